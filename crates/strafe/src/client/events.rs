use std::fmt;

use crate::net::ConnectParams;
use crate::snapshot::{Snapshot, SnapshotDiff};

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected {
        client_num: u32,
        params: ConnectParams,
    },
    Snapshot {
        snapshot: Snapshot,
        diff: SnapshotDiff,
    },
    /// A reliable text command from the server, delivered once and in order.
    ServerCommand(String),
    /// Out-of-band text, such as an rcon reply.
    Print(String),
    /// Terminal. Emitted once per connection attempt.
    Disconnected {
        reason: String,
    },
}

impl fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientEvent::Connected { client_num, .. } => write!(f, "connected as client {client_num}"),
            ClientEvent::Snapshot { snapshot, diff } => write!(
                f,
                "snapshot {} ({} entities, +{} -{} ~{})",
                snapshot.sequence,
                snapshot.entities.len(),
                diff.added.len(),
                diff.removed.len(),
                diff.changed.len()
            ),
            ClientEvent::ServerCommand(command) => write!(f, "server command: {command}"),
            ClientEvent::Print(text) => f.write_str(text),
            ClientEvent::Disconnected { reason } => write!(f, "connection lost: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_message() {
        let event = ClientEvent::Disconnected {
            reason: "connection timed out".into(),
        };
        assert_eq!(event.to_string(), "connection lost: connection timed out");
    }
}
