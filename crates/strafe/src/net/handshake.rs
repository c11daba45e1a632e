use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::channel::{Channel, ChannelConfig, ChannelState};
use super::connectionless::{ConnectParams, ConnectionlessPacket};
use super::error::NetError;
use super::protocol::PROTOCOL_VERSION;
use super::stats::rand_u64;
use super::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Challenging,
    Connecting,
    Accepted,
    Failed,
}

#[derive(Debug)]
pub enum HandshakeOutcome {
    Accepted {
        channel: Channel,
        client_num: u32,
        params: ConnectParams,
    },
    Rejected {
        reason: String,
    },
}

/// Client side of `GetChallenge -> Challenge -> Connect -> ConnectAccepted`.
///
/// Requests are resent every `resend_interval` until answered; the whole exchange gives
/// up after `connect_timeout`.
#[derive(Debug)]
pub struct Handshake {
    server: SocketAddr,
    state: HandshakeState,
    client_salt: u64,
    challenge: Option<u64>,
    userinfo: String,
    channel: Option<Channel>,
    resend_interval: Duration,
    connect_timeout: Duration,
    started: Instant,
    last_send: Option<Instant>,
}

impl Handshake {
    pub fn new(
        server: SocketAddr,
        userinfo: String,
        channel_config: ChannelConfig,
        resend_interval: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            server,
            state: HandshakeState::Idle,
            client_salt: rand_u64(),
            challenge: None,
            userinfo,
            channel: Some(Channel::new(server, channel_config)),
            resend_interval,
            connect_timeout,
            started: Instant::now(),
            last_send: None,
        }
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn channel_state(&self) -> Option<ChannelState> {
        self.channel.as_ref().map(Channel::state)
    }

    pub fn start<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<(), NetError> {
        let now = Instant::now();
        self.state = HandshakeState::Challenging;
        self.started = now;
        self.challenge = None;
        if let Some(channel) = self.channel.as_mut() {
            channel.begin_connect();
        }
        info!("connecting to {}", self.server);
        self.send_request(transport, now)
    }

    fn send_request<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        now: Instant,
    ) -> Result<(), NetError> {
        let packet = match (self.state, self.challenge) {
            (HandshakeState::Challenging, _) => ConnectionlessPacket::GetChallenge {
                client_salt: self.client_salt,
            },
            (HandshakeState::Connecting, Some(challenge)) => ConnectionlessPacket::Connect {
                protocol: PROTOCOL_VERSION,
                challenge,
                userinfo: self.userinfo.clone(),
            },
            _ => return Ok(()),
        };

        packet.send(transport, self.server)?;
        self.last_send = Some(now);
        Ok(())
    }

    /// Resends the pending request when due. Fails with `ConnectionTimedOut` once the
    /// connect timeout passes.
    pub fn update<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        now: Instant,
    ) -> Result<(), NetError> {
        if !matches!(
            self.state,
            HandshakeState::Challenging | HandshakeState::Connecting
        ) {
            return Ok(());
        }

        if now.saturating_duration_since(self.started) > self.connect_timeout {
            warn!("connection to {} timed out", self.server);
            self.fail();
            return Err(NetError::ConnectionTimedOut);
        }

        let due = self
            .last_send
            .is_none_or(|last| now.saturating_duration_since(last) >= self.resend_interval);
        if due {
            debug!("resending {:?} to {}", self.state, self.server);
            self.send_request(transport, now)?;
        }
        Ok(())
    }

    /// Feeds a connectionless reply from the server.
    pub fn handle<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        packet: ConnectionlessPacket,
    ) -> Result<Option<HandshakeOutcome>, NetError> {
        match (self.state, packet) {
            (
                HandshakeState::Challenging,
                ConnectionlessPacket::Challenge {
                    server_salt,
                    challenge,
                },
            ) => {
                if challenge != self.client_salt ^ server_salt {
                    debug!("ignoring challenge not meant for us");
                    return Ok(None);
                }
                self.challenge = Some(challenge);
                self.state = HandshakeState::Connecting;
                self.send_request(transport, Instant::now())?;
                Ok(None)
            }
            (
                HandshakeState::Connecting,
                ConnectionlessPacket::ConnectAccepted { client_num, params },
            ) => {
                if params.protocol != PROTOCOL_VERSION {
                    self.fail();
                    return Err(NetError::ProtocolMismatch {
                        local: PROTOCOL_VERSION,
                        remote: params.protocol,
                    });
                }

                let Some(mut channel) = self.channel.take() else {
                    return Ok(None);
                };
                channel.establish();
                self.state = HandshakeState::Accepted;
                info!("connected to {} as client {}", self.server, client_num);

                Ok(Some(HandshakeOutcome::Accepted {
                    channel,
                    client_num,
                    params,
                }))
            }
            (
                HandshakeState::Challenging | HandshakeState::Connecting,
                ConnectionlessPacket::ConnectRejected { reason },
            ) => {
                warn!("{} rejected connection: {}", self.server, reason);
                self.fail();
                Ok(Some(HandshakeOutcome::Rejected { reason }))
            }
            (state, other) => {
                debug!("ignoring {:?} while {:?}", other, state);
                Ok(None)
            }
        }
    }

    fn fail(&mut self) {
        self.state = HandshakeState::Failed;
        if let Some(channel) = self.channel.as_mut() {
            channel.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::LoopbackNetwork;

    fn handshake(server: SocketAddr) -> Handshake {
        Handshake::new(
            server,
            "name=tester".into(),
            ChannelConfig::default(),
            Duration::from_millis(500),
            Duration::from_secs(5),
        )
    }

    fn received<T: Transport>(transport: &mut T) -> ConnectionlessPacket {
        let (data, _) = transport.poll_receive().unwrap().unwrap();
        ConnectionlessPacket::deserialize(&data).unwrap()
    }

    #[test]
    fn test_full_exchange() {
        let network = LoopbackNetwork::new();
        let mut server = network.bind_port(27960).unwrap();
        let mut client = network.bind_port(40000).unwrap();

        let mut hs = handshake(server.local_addr());
        hs.start(&mut client).unwrap();
        assert_eq!(hs.channel_state(), Some(ChannelState::Connecting));

        let ConnectionlessPacket::GetChallenge { client_salt } = received(&mut server) else {
            panic!("expected challenge request");
        };

        let server_salt = 99;
        let reply = ConnectionlessPacket::Challenge {
            server_salt,
            challenge: client_salt ^ server_salt,
        };
        assert!(hs.handle(&mut client, reply).unwrap().is_none());
        assert_eq!(hs.state(), HandshakeState::Connecting);

        let ConnectionlessPacket::Connect { challenge, .. } = received(&mut server) else {
            panic!("expected connect");
        };
        assert_eq!(challenge, client_salt ^ server_salt);

        let accepted = ConnectionlessPacket::ConnectAccepted {
            client_num: 3,
            params: ConnectParams {
                protocol: PROTOCOL_VERSION,
                max_packet_size: 1200,
                reliable_window: 64,
                tick_rate: 20,
            },
        };
        match hs.handle(&mut client, accepted).unwrap() {
            Some(HandshakeOutcome::Accepted {
                channel,
                client_num,
                ..
            }) => {
                assert_eq!(client_num, 3);
                assert!(channel.is_established());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_resend_and_timeout() {
        let network = LoopbackNetwork::new();
        let mut server = network.bind_port(1).unwrap();
        let mut client = network.bind_port(2).unwrap();

        let mut hs = handshake(server.local_addr());
        hs.start(&mut client).unwrap();
        received(&mut server);

        let now = Instant::now();
        hs.update(&mut client, now + Duration::from_millis(600)).unwrap();
        assert!(matches!(
            received(&mut server),
            ConnectionlessPacket::GetChallenge { .. }
        ));

        assert!(matches!(
            hs.update(&mut client, now + Duration::from_secs(6)),
            Err(NetError::ConnectionTimedOut)
        ));
        assert_eq!(hs.state(), HandshakeState::Failed);
        assert_eq!(hs.channel_state(), Some(ChannelState::Closed));
    }

    #[test]
    fn test_rejection_reported() {
        let network = LoopbackNetwork::new();
        let server = network.bind_port(1).unwrap();
        let mut client = network.bind_port(2).unwrap();

        let mut hs = handshake(server.local_addr());
        hs.start(&mut client).unwrap();
        let outcome = hs
            .handle(
                &mut client,
                ConnectionlessPacket::ConnectRejected {
                    reason: "server is full".into(),
                },
            )
            .unwrap();
        assert!(matches!(
            outcome,
            Some(HandshakeOutcome::Rejected { reason }) if reason == "server is full"
        ));
    }
}
