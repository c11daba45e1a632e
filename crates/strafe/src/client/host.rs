use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Instant;

use log::{debug, info, trace, warn};

use crate::bitstream::{BitReader, CodecError};
use crate::net::{
    encode_client_payload, is_connectionless, Channel, ClientMessage, ConnectParams,
    ConnectionlessPacket, Handshake, HandshakeOutcome, NetError, ServerOp, Transport, UserCmd,
    MAX_COMMAND_LENGTH,
};
use crate::snapshot::{Snapshot, SnapshotError, SnapshotReconstructor};

use super::config::ClientConfig;
use super::events::ClientEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

/// Client side of the protocol: handshake, one channel, snapshot reconstruction.
pub struct ClientHost<T> {
    transport: T,
    config: ClientConfig,
    state: ClientState,
    server: Option<SocketAddr>,
    handshake: Option<Handshake>,
    channel: Option<Channel>,
    client_num: Option<u32>,
    params: Option<ConnectParams>,
    reconstructor: SnapshotReconstructor,
    commands: VecDeque<UserCmd>,
    events: VecDeque<ClientEvent>,
}

impl<T: Transport> ClientHost<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            reconstructor: SnapshotReconstructor::new(config.snapshot_backup),
            commands: VecDeque::with_capacity(config.cmd_backup),
            transport,
            config,
            state: ClientState::Disconnected,
            server: None,
            handshake: None,
            channel: None,
            client_num: None,
            params: None,
            events: VecDeque::new(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    pub fn client_num(&self) -> Option<u32> {
        self.client_num
    }

    pub fn params(&self) -> Option<&ConnectParams> {
        self.params.as_ref()
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.channel.as_ref()
    }

    pub fn latest_snapshot(&self) -> Option<&Snapshot> {
        self.reconstructor.latest()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.events.drain(..)
    }

    /// Starts a handshake with `server`, abandoning any previous connection.
    pub fn connect(&mut self, server: SocketAddr) -> Result<(), NetError> {
        self.reset();
        let mut handshake = Handshake::new(
            server,
            self.config.userinfo.clone(),
            self.config.channel.clone(),
            self.config.resend_interval(),
            self.config.connect_timeout(),
        );
        handshake.start(&mut self.transport)?;

        self.server = Some(server);
        self.handshake = Some(handshake);
        self.state = ClientState::Connecting;
        Ok(())
    }

    /// Sends a graceful disconnect and drops the connection without an event.
    pub fn disconnect(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            let sent = encode_client_payload(&[ClientMessage::Disconnect])
                .map_err(NetError::from)
                .and_then(|payload| channel.send(&mut self.transport, &payload));
            if let Err(e) = sent {
                debug!("disconnect not sent: {}", e);
            }
        }
        self.reset();
    }

    fn reset(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            channel.close();
        }
        self.state = ClientState::Disconnected;
        self.handshake = None;
        self.channel = None;
        self.client_num = None;
        self.params = None;
        self.reconstructor.reset();
        self.commands.clear();
    }

    fn terminate(&mut self, reason: impl Into<String>) {
        if self.state == ClientState::Disconnected {
            return;
        }
        let reason = reason.into();
        warn!("connection lost: {}", reason);
        self.reset();
        self.events.push_back(ClientEvent::Disconnected { reason });
    }

    /// Drains every queued datagram and runs handshake resends and timeouts.
    pub fn poll(&mut self) -> Result<(), NetError> {
        while let Some((datagram, from)) = self.transport.poll_receive()? {
            if Some(from) != self.server {
                trace!("{}: ignoring datagram from unexpected address", from);
                continue;
            }

            if is_connectionless(&datagram) {
                self.handle_connectionless(&datagram)?;
            } else {
                self.handle_sequenced(&datagram);
            }
        }

        let now = Instant::now();
        if let Some(handshake) = self.handshake.as_mut() {
            if let Err(e) = handshake.update(&mut self.transport, now) {
                self.terminate(e.to_string());
            }
        }
        if let Some(channel) = self.channel.as_mut() {
            if let Err(e) = channel.check_timeout(now) {
                self.terminate(e.to_string());
            }
        }
        Ok(())
    }

    fn handle_connectionless(&mut self, datagram: &[u8]) -> Result<(), NetError> {
        let packet = match ConnectionlessPacket::deserialize(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("malformed connectionless packet: {}", e);
                return Ok(());
            }
        };

        match packet {
            ConnectionlessPacket::Print { text } => {
                self.events.push_back(ClientEvent::Print(text));
                return Ok(());
            }
            ConnectionlessPacket::Disconnect if self.state == ClientState::Connected => {
                self.terminate("server disconnected");
                return Ok(());
            }
            _ => {}
        }

        let Some(handshake) = self.handshake.as_mut() else {
            trace!("ignoring {:?} outside of a handshake", packet);
            return Ok(());
        };

        match handshake.handle(&mut self.transport, packet) {
            Ok(Some(HandshakeOutcome::Accepted {
                channel,
                client_num,
                params,
            })) => {
                self.handshake = None;
                self.channel = Some(channel);
                self.client_num = Some(client_num);
                self.params = Some(params);
                self.state = ClientState::Connected;
                self.events
                    .push_back(ClientEvent::Connected { client_num, params });
            }
            Ok(Some(HandshakeOutcome::Rejected { reason })) => self.terminate(reason),
            Ok(None) => {}
            Err(e @ NetError::ProtocolMismatch { .. }) => self.terminate(e.to_string()),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn handle_sequenced(&mut self, datagram: &[u8]) {
        let Some(channel) = self.channel.as_mut() else {
            trace!("sequenced packet before the handshake finished");
            return;
        };

        let payload = match channel.process(datagram) {
            Ok(Some(payload)) => payload,
            Ok(None) => return,
            Err(e) => {
                debug!("{}", e);
                return;
            }
        };

        for command in channel.drain_commands() {
            self.events.push_back(ClientEvent::ServerCommand(command));
        }

        if let Err(e) = self.read_server_payload(&payload) {
            debug!("dropping rest of server payload: {}", e);
        }
    }

    fn read_server_payload(&mut self, payload: &[u8]) -> Result<(), CodecError> {
        let mut reader = BitReader::new(payload);

        while reader.remaining_bits() >= 8 {
            match ServerOp::try_from(reader.read_u8()?)? {
                ServerOp::Nop => {}
                ServerOp::Eof => break,
                ServerOp::Snapshot => {
                    let result = self.reconstructor.read_snapshot(&mut reader);
                    reader.align();
                    match result {
                        Ok((snapshot, diff)) => {
                            trace!("applied snapshot {}", snapshot.sequence);
                            self.events
                                .push_back(ClientEvent::Snapshot { snapshot, diff });
                        }
                        Err(SnapshotError::Codec(e)) => return Err(e),
                        Err(e) => debug!("snapshot discarded: {}", e),
                    }
                }
                ServerOp::Disconnect => {
                    let reason = reader.read_string(MAX_COMMAND_LENGTH)?;
                    info!("server dropped us: {}", reason);
                    self.terminate(reason);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Sends `command` together with the previous few, acknowledging the newest applied
    /// snapshot or asking for a full one.
    pub fn send_input(&mut self, command: UserCmd) -> Result<(), NetError> {
        if self.state != ClientState::Connected {
            return Err(NetError::NotEstablished);
        }

        while self.commands.len() >= self.config.cmd_backup.max(1) {
            self.commands.pop_front();
        }
        self.commands.push_back(command);

        let ack = if self.reconstructor.needs_full() {
            None
        } else {
            self.reconstructor.last_applied()
        };
        let payload = encode_client_payload(&[ClientMessage::Move {
            ack,
            commands: self.commands.iter().copied().collect(),
        }])?;

        let channel = self.channel.as_mut().ok_or(NetError::NotEstablished)?;
        match channel.send(&mut self.transport, &payload) {
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => {
                self.terminate(e.to_string());
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Queues a reliable command for the server. It rides along with the next input.
    pub fn send_command(&mut self, command: &str) -> Result<u32, NetError> {
        let channel = self.channel.as_mut().ok_or(NetError::NotEstablished)?;
        match channel.queue_command(command) {
            Ok(index) => Ok(index),
            Err(e @ NetError::ReliableOverflow { .. }) => {
                self.terminate(e.to_string());
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Sends an out-of-band request to `addr`, for server browsers and rcon.
    pub fn send_connectionless(
        &mut self,
        packet: &ConnectionlessPacket,
        addr: SocketAddr,
    ) -> Result<(), NetError> {
        packet.send(&mut self.transport, addr)
    }
}
