use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::net::{
    decode_client_payload, encode_server_disconnect, encode_server_snapshot, is_connectionless,
    ChannelConfig, ClientMessage, ConnectionlessPacket, Dispatch, Dispatcher, NetError,
    PlayerStatus, ServerInfo, SessionView, Transport, PROTOCOL_VERSION,
};
use crate::snapshot::{SnapshotBuilder, WorldSource};

use super::config::ServerConfig;
use super::events::{DisconnectReason, ServerEvent};
use super::session::{ClientSession, SessionTable, MAX_CLIENTS};

/// Server side of the protocol: one transport, many client sessions.
///
/// Call [`ServerHost::poll`] once per frame to drain the socket, and
/// [`ServerHost::send_snapshots`] once per simulation tick.
pub struct ServerHost<T> {
    transport: T,
    config: ServerConfig,
    dispatcher: Dispatcher,
    sessions: SessionTable,
    builder: SnapshotBuilder,
    events: VecDeque<ServerEvent>,
}

struct HostView<'a> {
    sessions: &'a SessionTable,
    config: &'a ServerConfig,
}

impl SessionView for HostView<'_> {
    fn slot_of(&self, addr: SocketAddr) -> Option<u32> {
        self.sessions.slot_of(addr)
    }

    fn free_slot(&self) -> Option<u32> {
        self.sessions.free_slot()
    }

    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: self.config.name.clone(),
            map: self.config.map.clone(),
            protocol: PROTOCOL_VERSION,
            clients: self.sessions.len() as u32,
            max_clients: self.sessions.max_clients() as u32,
        }
    }

    fn player_status(&self) -> Vec<PlayerStatus> {
        self.sessions
            .iter()
            .map(|s| PlayerStatus {
                client_num: s.client_num,
                name: s.name().to_owned(),
                ping_ms: s.ping_ms(),
            })
            .collect()
    }
}

impl<T: Transport> ServerHost<T> {
    pub fn new(transport: T, mut config: ServerConfig) -> Self {
        config.channel = config.channel.normalized();
        config.max_clients = config.max_clients.clamp(1, MAX_CLIENTS);
        let mut dispatcher_config = config.dispatcher.clone();
        dispatcher_config.tick_rate = config.tick_rate;

        Self {
            dispatcher: Dispatcher::new(dispatcher_config, config.channel.clone()),
            sessions: SessionTable::new(config.max_clients),
            builder: SnapshotBuilder::default(),
            events: VecDeque::new(),
            transport,
            config,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn channel_config(&self) -> &ChannelConfig {
        &self.config.channel
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.tick_rate.max(1) as f64)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn session(&self, client_num: u32) -> Option<&ClientSession> {
        self.sessions.get(client_num)
    }

    pub fn client_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn server_info(&self) -> ServerInfo {
        self.view().server_info()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.events.drain(..)
    }

    fn view(&self) -> HostView<'_> {
        HostView {
            sessions: &self.sessions,
            config: &self.config,
        }
    }

    /// Drains every queued datagram, then drops clients that went quiet.
    pub fn poll(&mut self) -> Result<(), NetError> {
        while let Some((datagram, from)) = self.transport.poll_receive()? {
            if is_connectionless(&datagram) {
                self.handle_connectionless(&datagram, from)?;
            } else {
                self.handle_sequenced(&datagram, from);
            }
        }

        self.check_timeouts(Instant::now());
        Ok(())
    }

    fn handle_connectionless(&mut self, datagram: &[u8], from: SocketAddr) -> Result<(), NetError> {
        let view = HostView {
            sessions: &self.sessions,
            config: &self.config,
        };

        match self.dispatcher.handle(&mut self.transport, &view, datagram, from) {
            Ok(Dispatch::Handled) => {}
            Ok(Dispatch::Connected {
                addr,
                client_num,
                channel,
                userinfo,
                replaced,
                ..
            }) => {
                if replaced {
                    if let Some(old) = self.sessions.remove_by_addr(addr) {
                        self.events.push_back(ServerEvent::ClientDisconnected {
                            client_num: old.client_num,
                            reason: DisconnectReason::Replaced,
                        });
                    }
                }

                let session =
                    ClientSession::new(client_num, channel, userinfo.clone(), self.config.snapshot);
                info!("client {} ({}) connected from {}", client_num, session.name(), addr);
                self.sessions.insert(session);
                self.events.push_back(ServerEvent::ClientConnected {
                    client_num,
                    addr,
                    userinfo,
                });
            }
            Ok(Dispatch::Rcon { addr, command }) => {
                self.events.push_back(ServerEvent::Rcon { addr, command });
            }
            Ok(Dispatch::Disconnect { addr }) => {
                if let Some(client_num) = self.sessions.slot_of(addr) {
                    self.drop_client(client_num, DisconnectReason::Graceful);
                }
            }
            Err(e @ NetError::ProtocolMismatch { .. }) => {
                self.events.push_back(ServerEvent::ConnectionDenied {
                    addr: from,
                    reason: e.to_string(),
                });
            }
            Err(NetError::Io(e)) => {
                warn!("{}: failed to reply: {}", from, e);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn handle_sequenced(&mut self, datagram: &[u8], from: SocketAddr) {
        let Some(session) = self.sessions.get_by_addr_mut(from) else {
            trace!("{}: sequenced packet from unknown address", from);
            return;
        };
        let client_num = session.client_num;

        let payload = match session.channel.process(datagram) {
            Ok(Some(payload)) => payload,
            Ok(None) => return,
            Err(e) => {
                debug!("client {}: {}", client_num, e);
                return;
            }
        };

        for command in session.channel.drain_commands() {
            self.events.push_back(ServerEvent::ClientCommand {
                client_num,
                command,
            });
        }

        let messages = match decode_client_payload(&payload) {
            Ok(messages) => messages,
            Err(e) => {
                debug!("client {}: dropping payload: {}", client_num, e);
                return;
            }
        };

        let now = Instant::now();
        for message in messages {
            match message {
                ClientMessage::Move { ack, commands } => {
                    match ack {
                        Some(ack) => {
                            session.snapshots.acknowledge(ack, now);
                        }
                        None => session.snapshots.request_full(),
                    }
                    let commands = session.accept_usercmds(commands);
                    if !commands.is_empty() {
                        self.events.push_back(ServerEvent::UserCommands {
                            client_num,
                            commands,
                        });
                    }
                }
                ClientMessage::Disconnect => {
                    self.drop_client(client_num, DisconnectReason::Graceful);
                    return;
                }
            }
        }
    }

    fn check_timeouts(&mut self, now: Instant) {
        let timed_out: Vec<u32> = self
            .sessions
            .iter_mut()
            .filter_map(|s| s.channel.check_timeout(now).err().map(|_| s.client_num))
            .collect();

        for client_num in timed_out {
            self.drop_client(client_num, DisconnectReason::Timeout);
        }
    }

    /// Builds and sends one snapshot to every client that is due one this tick.
    pub fn send_snapshots<W: WorldSource + ?Sized>(&mut self, world: &W) -> Result<(), NetError> {
        let server_time = world.server_time();
        let mut closed = Vec::new();

        for session in self.sessions.iter_mut() {
            if !session.snapshots.tick() {
                continue;
            }

            let client_num = session.client_num as u8;
            let player = world.player_state(client_num);
            let encoded = self.builder.build(
                &mut session.snapshots,
                server_time,
                &player,
                world.visible_entities(client_num),
            )?;
            let payload = encode_server_snapshot(&encoded.bytes)?;

            match session.channel.send(&mut self.transport, &payload) {
                Ok(_) => {}
                Err(NetError::ChannelClosed) => closed.push(session.client_num),
                Err(NetError::Io(e)) => {
                    warn!("client {}: send failed: {}", session.client_num, e);
                }
                Err(e) => return Err(e),
            }
        }

        for client_num in closed {
            self.drop_client(client_num, DisconnectReason::Timeout);
        }
        Ok(())
    }

    /// Queues a reliable command for one client. Overflowing its window drops the client.
    pub fn send_command(&mut self, client_num: u32, command: &str) -> Result<u32, NetError> {
        let session = self
            .sessions
            .get_mut(client_num)
            .ok_or(NetError::NotEstablished)?;

        match session.channel.queue_command(command) {
            Ok(index) => Ok(index),
            Err(e @ NetError::ReliableOverflow { .. }) => {
                self.drop_client(client_num, DisconnectReason::ReliableOverflow);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub fn broadcast_command(&mut self, command: &str) {
        for client_num in self.sessions.client_nums() {
            if let Err(e) = self.send_command(client_num, command) {
                debug!("client {}: {}", client_num, e);
            }
        }
    }

    /// Out-of-band text to any address, such as the reply to an rcon command.
    pub fn send_print(&mut self, addr: SocketAddr, text: &str) -> Result<(), NetError> {
        ConnectionlessPacket::Print {
            text: text.to_owned(),
        }
        .send(&mut self.transport, addr)
    }

    /// Tells the client why it is being dropped, then frees its slot.
    pub fn kick(&mut self, client_num: u32, reason: &str) {
        if let Some(session) = self.sessions.get_mut(client_num) {
            let sent = encode_server_disconnect(reason)
                .map_err(NetError::from)
                .and_then(|payload| session.channel.send(&mut self.transport, &payload));
            if let Err(e) = sent {
                debug!("client {}: disconnect notice not sent: {}", client_num, e);
            }
        }
        self.drop_client(client_num, DisconnectReason::Kicked);
    }

    pub fn shutdown(&mut self) {
        for client_num in self.sessions.client_nums() {
            self.kick(client_num, "server shutting down");
        }
    }

    fn drop_client(&mut self, client_num: u32, reason: DisconnectReason) {
        let Some(mut session) = self.sessions.remove(client_num) else {
            return;
        };
        session.channel.close();
        info!("client {} {}", client_num, reason);
        self.events
            .push_back(ServerEvent::ClientDisconnected { client_num, reason });
    }
}
