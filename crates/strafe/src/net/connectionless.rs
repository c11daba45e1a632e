use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use rkyv::rancor;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use super::channel::{Channel, ChannelConfig};
use super::error::NetError;
use super::protocol::{is_connectionless, CONNECTIONLESS_MARKER, PROTOCOL_VERSION};
use super::rate_limit::{Bucket, RateLimiter};
use super::stats::rand_u64;
use super::transport::Transport;

/// Parameters the server hands the client on accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ConnectParams {
    pub protocol: u32,
    pub max_packet_size: u32,
    pub reliable_window: u32,
    pub tick_rate: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ServerInfo {
    pub name: String,
    pub map: String,
    pub protocol: u32,
    pub clients: u32,
    pub max_clients: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerStatus {
    pub client_num: u32,
    pub name: String,
    pub ping_ms: u32,
}

/// Out-of-band datagram body, sent after the connectionless marker.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum ConnectionlessPacket {
    GetChallenge {
        client_salt: u64,
    },
    Challenge {
        server_salt: u64,
        challenge: u64,
    },
    Connect {
        protocol: u32,
        challenge: u64,
        userinfo: String,
    },
    ConnectAccepted {
        client_num: u32,
        params: ConnectParams,
    },
    ConnectRejected {
        reason: String,
    },
    GetInfo {
        nonce: u32,
    },
    InfoResponse {
        nonce: u32,
        info: ServerInfo,
    },
    GetStatus {
        nonce: u32,
    },
    StatusResponse {
        nonce: u32,
        info: ServerInfo,
        players: Vec<PlayerStatus>,
    },
    Rcon {
        password: String,
        command: String,
    },
    Print {
        text: String,
    },
    Disconnect,
}

impl ConnectionlessPacket {
    pub fn serialize(&self) -> Result<Vec<u8>, NetError> {
        let body = rkyv::to_bytes::<rancor::Error>(self).map_err(NetError::Serialize)?;

        let mut datagram = Vec::with_capacity(4 + body.len());
        datagram.extend_from_slice(&CONNECTIONLESS_MARKER.to_le_bytes());
        datagram.extend_from_slice(&body);
        Ok(datagram)
    }

    /// Parses a datagram that starts with the connectionless marker.
    pub fn deserialize(datagram: &[u8]) -> Result<Self, NetError> {
        if !is_connectionless(datagram) {
            return Err(NetError::Codec(crate::bitstream::CodecError::TruncatedMessage {
                needed: 32,
                available: datagram.len() * 8,
            }));
        }

        // archived data must be aligned; the socket buffer offset by the marker is not
        let body = &datagram[4..];
        let mut aligned = AlignedVec::<16>::with_capacity(body.len());
        aligned.extend_from_slice(body);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(NetError::Deserialize)
    }

    pub fn send<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        addr: SocketAddr,
    ) -> Result<(), NetError> {
        let datagram = self.serialize()?;
        transport.send(&datagram, addr)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DuplicateConnectPolicy {
    /// Drop the existing session and accept the new connection in its slot.
    #[default]
    Replace,
    /// Keep the existing session and silently drop the new attempt.
    Ignore,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DispatcherConfig {
    pub challenge_timeout_ms: u64,
    pub max_challenges: usize,
    pub rate_limit_burst: u32,
    pub rate_limit_period_ms: u64,
    pub global_rate_limit_burst: u32,
    pub global_rate_limit_period_ms: u64,
    pub rcon_password: Option<String>,
    pub duplicate_connect: DuplicateConnectPolicy,
    pub tick_rate: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            challenge_timeout_ms: 5_000,
            max_challenges: 1024,
            rate_limit_burst: 10,
            rate_limit_period_ms: 1_000,
            global_rate_limit_burst: 10,
            global_rate_limit_period_ms: 100,
            rcon_password: None,
            duplicate_connect: DuplicateConnectPolicy::Replace,
            tick_rate: super::protocol::DEFAULT_TICK_RATE,
        }
    }
}

/// What the dispatcher needs to know about the server's current sessions.
pub trait SessionView {
    /// Slot currently held by `addr`, if it has an established session.
    fn slot_of(&self, addr: SocketAddr) -> Option<u32>;

    /// A free client slot, or `None` when the server is full.
    fn free_slot(&self) -> Option<u32>;

    fn server_info(&self) -> ServerInfo;

    fn player_status(&self) -> Vec<PlayerStatus>;
}

/// Outcome of one connectionless datagram that needs the session layer's attention.
#[derive(Debug)]
pub enum Dispatch {
    /// Handled, replied to, or dropped.
    Handled,
    Connected {
        addr: SocketAddr,
        client_num: u32,
        channel: Channel,
        params: ConnectParams,
        userinfo: String,
        /// The address already had a session, which the caller must drop first.
        replaced: bool,
    },
    Rcon {
        addr: SocketAddr,
        command: String,
    },
    Disconnect {
        addr: SocketAddr,
    },
}

#[derive(Debug, Clone, Copy)]
struct PendingChallenge {
    client_salt: u64,
    server_salt: u64,
    created: Instant,
    /// Slot granted with this challenge. A resent connect gets the same answer.
    accepted: Option<u32>,
}

impl PendingChallenge {
    fn challenge(&self) -> u64 {
        self.client_salt ^ self.server_salt
    }
}

/// Server-side handler for everything that arrives before a channel exists.
#[derive(Debug)]
pub struct Dispatcher {
    config: DispatcherConfig,
    channel_config: ChannelConfig,
    challenges: HashMap<SocketAddr, PendingChallenge>,
    per_ip: RateLimiter,
    global: Bucket,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, channel_config: ChannelConfig) -> Self {
        let channel_config = channel_config.normalized();
        let per_ip = RateLimiter::new(
            config.rate_limit_burst,
            Duration::from_millis(config.rate_limit_period_ms),
            config.max_challenges.max(64),
        );

        Self {
            config,
            channel_config,
            challenges: HashMap::new(),
            per_ip,
            global: Bucket::new(Instant::now()),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn pending_challenges(&self) -> usize {
        self.challenges.len()
    }

    fn params(&self) -> ConnectParams {
        ConnectParams {
            protocol: PROTOCOL_VERSION,
            max_packet_size: self.channel_config.max_packet_size as u32,
            reliable_window: self.channel_config.reliable_window as u32,
            tick_rate: self.config.tick_rate,
        }
    }

    fn admit_global(&mut self, now: Instant) -> bool {
        self.global.admit(
            self.config.global_rate_limit_burst,
            Duration::from_millis(self.config.global_rate_limit_period_ms),
            now,
        )
    }

    /// Handles one connectionless datagram. Malformed and rate-limited requests are
    /// dropped without a reply.
    pub fn handle<T, S>(
        &mut self,
        transport: &mut T,
        sessions: &S,
        datagram: &[u8],
        from: SocketAddr,
    ) -> Result<Dispatch, NetError>
    where
        T: Transport + ?Sized,
        S: SessionView + ?Sized,
    {
        let now = Instant::now();

        let packet = match ConnectionlessPacket::deserialize(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("{}: malformed connectionless packet: {}", from, e);
                return Ok(Dispatch::Handled);
            }
        };
        trace!("{}: connectionless {:?}", from, packet);

        match packet {
            ConnectionlessPacket::GetChallenge { client_salt } => {
                if !self.per_ip.admit(from.ip(), now) {
                    debug!("{}: challenge request rate limited", from);
                    return Ok(Dispatch::Handled);
                }
                let pending = self.issue_challenge(from, client_salt, now);
                ConnectionlessPacket::Challenge {
                    server_salt: pending.server_salt,
                    challenge: pending.challenge(),
                }
                .send(transport, from)?;
                Ok(Dispatch::Handled)
            }
            ConnectionlessPacket::Connect {
                protocol,
                challenge,
                userinfo,
            } => self.handle_connect(transport, sessions, from, protocol, challenge, userinfo, now),
            ConnectionlessPacket::GetInfo { nonce } => {
                if !self.per_ip.admit(from.ip(), now) {
                    debug!("{}: info request rate limited", from);
                    return Ok(Dispatch::Handled);
                }
                ConnectionlessPacket::InfoResponse {
                    nonce,
                    info: sessions.server_info(),
                }
                .send(transport, from)?;
                Ok(Dispatch::Handled)
            }
            ConnectionlessPacket::GetStatus { nonce } => {
                if !self.per_ip.admit(from.ip(), now) || !self.admit_global(now) {
                    debug!("{}: status request rate limited", from);
                    return Ok(Dispatch::Handled);
                }
                ConnectionlessPacket::StatusResponse {
                    nonce,
                    info: sessions.server_info(),
                    players: sessions.player_status(),
                }
                .send(transport, from)?;
                Ok(Dispatch::Handled)
            }
            ConnectionlessPacket::Rcon { password, command } => {
                self.handle_rcon(transport, from, password, command, now)
            }
            ConnectionlessPacket::Disconnect => {
                if sessions.slot_of(from).is_some() {
                    Ok(Dispatch::Disconnect { addr: from })
                } else {
                    Ok(Dispatch::Handled)
                }
            }
            other => {
                debug!("{}: unexpected client-bound packet {:?}", from, other);
                Ok(Dispatch::Handled)
            }
        }
    }

    fn issue_challenge(
        &mut self,
        from: SocketAddr,
        client_salt: u64,
        now: Instant,
    ) -> PendingChallenge {
        let timeout = Duration::from_millis(self.config.challenge_timeout_ms);
        self.challenges
            .retain(|_, pending| now.saturating_duration_since(pending.created) <= timeout);

        // a resent request keeps its original challenge
        if let Some(existing) = self.challenges.get(&from) {
            if existing.client_salt == client_salt {
                return *existing;
            }
        }

        if !self.challenges.contains_key(&from) && self.challenges.len() >= self.config.max_challenges
        {
            let oldest = self
                .challenges
                .iter()
                .min_by_key(|(_, pending)| pending.created)
                .map(|(addr, _)| *addr);
            if let Some(addr) = oldest {
                self.challenges.remove(&addr);
            }
        }

        let pending = PendingChallenge {
            client_salt,
            server_salt: rand_u64(),
            created: now,
            accepted: None,
        };
        self.challenges.insert(from, pending);
        pending
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_connect<T, S>(
        &mut self,
        transport: &mut T,
        sessions: &S,
        from: SocketAddr,
        protocol: u32,
        challenge: u64,
        userinfo: String,
        now: Instant,
    ) -> Result<Dispatch, NetError>
    where
        T: Transport + ?Sized,
        S: SessionView + ?Sized,
    {
        if !self.per_ip.admit(from.ip(), now) {
            debug!("{}: connect rate limited", from);
            return Ok(Dispatch::Handled);
        }

        if protocol != PROTOCOL_VERSION {
            warn!(
                "{}: protocol mismatch (client {}, server {})",
                from, protocol, PROTOCOL_VERSION
            );
            ConnectionlessPacket::ConnectRejected {
                reason: format!(
                    "protocol mismatch: server uses {}, client uses {}",
                    PROTOCOL_VERSION, protocol
                ),
            }
            .send(transport, from)?;
            return Err(NetError::ProtocolMismatch {
                local: PROTOCOL_VERSION,
                remote: protocol,
            });
        }

        let timeout = Duration::from_millis(self.config.challenge_timeout_ms);
        let pending = self.challenges.get(&from).copied().filter(|pending| {
            pending.challenge() == challenge
                && now.saturating_duration_since(pending.created) <= timeout
        });
        let Some(pending) = pending else {
            debug!("{}: connect with bad or expired challenge", from);
            return Ok(Dispatch::Handled);
        };

        let existing = sessions.slot_of(from);
        if let Some(slot) = pending.accepted.filter(|&slot| existing == Some(slot)) {
            debug!("{}: connect resent, repeating accept for client {}", from, slot);
            ConnectionlessPacket::ConnectAccepted {
                client_num: slot,
                params: self.params(),
            }
            .send(transport, from)?;
            return Ok(Dispatch::Handled);
        }

        let (client_num, replaced) = match (existing, self.config.duplicate_connect) {
            (Some(_), DuplicateConnectPolicy::Ignore) => {
                debug!("{}: already connected, ignoring connect", from);
                return Ok(Dispatch::Handled);
            }
            (Some(slot), DuplicateConnectPolicy::Replace) => (slot, true),
            (None, _) => match sessions.free_slot() {
                Some(slot) => (slot, false),
                None => {
                    info!("{}: rejected, server is full", from);
                    ConnectionlessPacket::ConnectRejected {
                        reason: "server is full".to_owned(),
                    }
                    .send(transport, from)?;
                    return Ok(Dispatch::Handled);
                }
            },
        };

        if let Some(pending) = self.challenges.get_mut(&from) {
            pending.accepted = Some(client_num);
        }
        let params = self.params();
        ConnectionlessPacket::ConnectAccepted { client_num, params }.send(transport, from)?;

        info!(
            "{}: accepted as client {}{}",
            from,
            client_num,
            if replaced { " (replacing session)" } else { "" }
        );

        Ok(Dispatch::Connected {
            addr: from,
            client_num,
            channel: Channel::established(from, self.channel_config.clone()),
            params,
            userinfo,
            replaced,
        })
    }

    fn handle_rcon<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        from: SocketAddr,
        password: String,
        command: String,
        now: Instant,
    ) -> Result<Dispatch, NetError> {
        if self.config.rcon_password.as_deref().is_none_or(str::is_empty) {
            return Ok(Dispatch::Handled);
        }
        if !self.per_ip.admit(from.ip(), now) || !self.admit_global(now) {
            debug!("{}: rcon rate limited", from);
            return Ok(Dispatch::Handled);
        }

        if self.config.rcon_password.as_deref() != Some(password.as_str()) {
            warn!("{}: bad rcon password", from);
            ConnectionlessPacket::Print {
                text: "bad rcon password".to_owned(),
            }
            .send(transport, from)?;
            return Ok(Dispatch::Handled);
        }

        info!("{}: rcon \"{}\"", from, command);
        Ok(Dispatch::Rcon {
            addr: from,
            command,
        })
    }
}
