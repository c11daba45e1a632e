use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use strafe::net::{ConnectionlessPacket, DispatcherConfig, PROTOCOL_VERSION};
use strafe::{
    ClientConfig, ClientEvent, ClientHost, EntityType, EntityWorld, ServerConfig, ServerEvent,
    ServerHost, Transport, UdpEndpoint,
};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{}", port).parse().unwrap()
}

fn server(port: u16, config: ServerConfig) -> ServerHost<UdpEndpoint> {
    ServerHost::new(UdpEndpoint::bind(addr(port)).unwrap(), config)
}

fn client(port: u16) -> ClientHost<UdpEndpoint> {
    ClientHost::new(UdpEndpoint::bind(addr(port)).unwrap(), ClientConfig::default())
}

/// Pumps both hosts until `done` holds or the deadline passes.
fn pump_until(
    server: &mut ServerHost<UdpEndpoint>,
    client: &mut ClientHost<UdpEndpoint>,
    timeout_ms: u64,
    mut done: impl FnMut(&[ServerEvent], &[ClientEvent]) -> bool,
) -> (Vec<ServerEvent>, Vec<ClientEvent>) {
    let mut server_events = Vec::new();
    let mut client_events = Vec::new();
    let start = Instant::now();

    while start.elapsed() < Duration::from_millis(timeout_ms) {
        server.poll().unwrap();
        client.poll().unwrap();
        server_events.extend(server.drain_events());
        client_events.extend(client.drain_events());
        if done(&server_events, &client_events) {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    (server_events, client_events)
}

fn wait_for_reply(endpoint: &mut UdpEndpoint, timeout_ms: u64) -> Option<ConnectionlessPacket> {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        if let Some((data, _)) = endpoint.poll_receive().unwrap() {
            return ConnectionlessPacket::deserialize(&data).ok();
        }
        thread::sleep(Duration::from_millis(1));
    }
    None
}

#[test]
fn test_connection_handshake_full_flow() {
    let port = next_port();
    let mut server = server(port, ServerConfig::default());
    let mut client = client(port + 1);

    client.connect(addr(port)).unwrap();
    let (server_events, client_events) = pump_until(&mut server, &mut client, 500, |_, c| {
        c.iter().any(|e| matches!(e, ClientEvent::Connected { .. }))
    });

    assert!(client.is_connected());
    assert_eq!(client.client_num(), Some(0));
    assert!(client_events
        .iter()
        .any(|e| matches!(e, ClientEvent::Connected { client_num: 0, params } if params.protocol == PROTOCOL_VERSION)));
    assert!(server_events
        .iter()
        .any(|e| matches!(e, ServerEvent::ClientConnected { client_num: 0, .. })));
    assert_eq!(server.client_count(), 1);
    assert_eq!(server.session(0).unwrap().name(), "player");
}

#[test]
fn test_connection_denied_server_full() {
    let port = next_port();
    let config = ServerConfig {
        max_clients: 1,
        ..Default::default()
    };
    let mut server = server(port, config);
    let mut first = client(port + 1);
    let mut second = client(port + 2);

    first.connect(addr(port)).unwrap();
    pump_until(&mut server, &mut first, 500, |_, _| false);
    assert!(first.is_connected());

    second.connect(addr(port)).unwrap();
    let (_, events) = pump_until(&mut server, &mut second, 500, |_, c| {
        c.iter().any(|e| matches!(e, ClientEvent::Disconnected { .. }))
    });

    assert!(!second.is_connected());
    assert!(events
        .iter()
        .any(|e| e.to_string() == "connection lost: server is full"));
    assert_eq!(server.client_count(), 1);
}

#[test]
fn test_snapshots_flow_over_udp() {
    let port = next_port();
    let mut server = server(port, ServerConfig::default());
    let mut client = client(port + 1);
    let mut world = EntityWorld::new();
    let crate_id = world.spawn(EntityType::Item).unwrap();

    client.connect(addr(port)).unwrap();
    pump_until(&mut server, &mut client, 500, |_, _| false);
    assert!(client.is_connected());

    let start = Instant::now();
    let mut snapshots = 0;
    while start.elapsed() < Duration::from_millis(1000) && snapshots < 5 {
        server.send_snapshots(&world).unwrap();
        if let Some(entity) = world.get_mut(crate_id) {
            entity.origin.x += 1.0;
        }
        thread::sleep(Duration::from_millis(5));
        server.poll().unwrap();
        client.poll().unwrap();
        for event in client.drain_events() {
            if let ClientEvent::Snapshot { .. } = event {
                snapshots += 1;
            }
        }
        client
            .send_input(strafe::UserCmd::new(start.elapsed().as_millis() as i32))
            .unwrap();
    }

    assert!(snapshots >= 5);
    let latest = client.latest_snapshot().unwrap();
    assert!(latest.entity(crate_id).unwrap().origin.x > 0.0);
}

#[test]
fn test_info_query_answered() {
    let port = next_port();
    let config = ServerConfig {
        name: "test arena".into(),
        ..Default::default()
    };
    let mut server = server(port, config);
    let mut browser = UdpEndpoint::bind(addr(port + 1)).unwrap();

    ConnectionlessPacket::GetInfo { nonce: 77 }
        .send(&mut browser, addr(port))
        .unwrap();

    let start = Instant::now();
    let mut reply = None;
    while reply.is_none() && start.elapsed() < Duration::from_millis(500) {
        server.poll().unwrap();
        reply = wait_for_reply(&mut browser, 5);
    }

    match reply {
        Some(ConnectionlessPacket::InfoResponse { nonce, info }) => {
            assert_eq!(nonce, 77);
            assert_eq!(info.name, "test arena");
            assert_eq!(info.clients, 0);
        }
        other => panic!("expected InfoResponse, got {:?}", other),
    }
}

#[test]
fn test_protocol_mismatch_rejected() {
    let port = next_port();
    let mut server = server(port, ServerConfig::default());
    let mut rogue = UdpEndpoint::bind(addr(port + 1)).unwrap();

    ConnectionlessPacket::GetChallenge { client_salt: 5 }
        .send(&mut rogue, addr(port))
        .unwrap();
    let mut challenge = None;
    let start = Instant::now();
    while challenge.is_none() && start.elapsed() < Duration::from_millis(500) {
        server.poll().unwrap();
        challenge = wait_for_reply(&mut rogue, 5);
    }
    let Some(ConnectionlessPacket::Challenge { challenge, .. }) = challenge else {
        panic!("expected Challenge");
    };

    ConnectionlessPacket::Connect {
        protocol: PROTOCOL_VERSION + 1,
        challenge,
        userinfo: "name=old".into(),
    }
    .send(&mut rogue, addr(port))
    .unwrap();

    let mut reply = None;
    let start = Instant::now();
    while reply.is_none() && start.elapsed() < Duration::from_millis(500) {
        server.poll().unwrap();
        reply = wait_for_reply(&mut rogue, 5);
    }

    assert!(matches!(reply, Some(ConnectionlessPacket::ConnectRejected { .. })));
    assert!(server
        .drain_events()
        .any(|e| matches!(e, ServerEvent::ConnectionDenied { .. })));
    assert_eq!(server.client_count(), 0);
}

#[test]
fn test_rcon_reaches_server() {
    let port = next_port();
    let config = ServerConfig {
        dispatcher: DispatcherConfig {
            rcon_password: Some("secret".into()),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut server = server(port, config);
    let mut admin = UdpEndpoint::bind(addr(port + 1)).unwrap();

    ConnectionlessPacket::Rcon {
        password: "secret".into(),
        command: "map q3dm6".into(),
    }
    .send(&mut admin, addr(port))
    .unwrap();

    let start = Instant::now();
    let mut command = None;
    while command.is_none() && start.elapsed() < Duration::from_millis(500) {
        server.poll().unwrap();
        command = server.drain_events().find_map(|e| match e {
            ServerEvent::Rcon { command, .. } => Some(command),
            _ => None,
        });
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(command.as_deref(), Some("map q3dm6"));
}
