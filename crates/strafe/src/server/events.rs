use std::fmt;
use std::net::SocketAddr;

use crate::net::UserCmd;

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ClientConnected {
        client_num: u32,
        addr: SocketAddr,
        userinfo: String,
    },
    ClientDisconnected {
        client_num: u32,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    /// Commands the client had not sent before, oldest first.
    UserCommands {
        client_num: u32,
        commands: Vec<UserCmd>,
    },
    /// A reliable text command, delivered once and in order.
    ClientCommand {
        client_num: u32,
        command: String,
    },
    Rcon {
        addr: SocketAddr,
        command: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
    ReliableOverflow,
    Replaced,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::ReliableOverflow => "reliable command overflow",
            DisconnectReason::Replaced => "reconnected",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
