mod bot;
mod stats;

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;

use strafe::{
    ClientConfig, ClientEvent, ClientHost, ConnectionlessPacket, Transport, UdpEndpoint,
    DEFAULT_TICK_RATE,
};

use bot::Bot;
use stats::SnapshotStats;

#[derive(Parser)]
#[command(name = "strafe-client")]
#[command(about = "Headless strafe client")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:27960",
        help = "Server address to connect to"
    )]
    server: String,

    #[arg(short, long, default_value = "player")]
    name: String,

    #[arg(long, default_value = "0.0.0.0:0", help = "Local address to bind")]
    bind: String,

    #[arg(long, default_value_t = DEFAULT_TICK_RATE, help = "Usercmds sent per second")]
    cmd_rate: u32,

    #[arg(long, default_value_t = 30, help = "Seconds to stay connected, 0 for forever")]
    duration: u64,

    #[arg(long, default_value_t = 90.0, help = "Bot turn rate in degrees per second")]
    turn_rate: f32,

    #[arg(short, long, help = "Reliable command to send once connected (repeatable)")]
    command: Vec<String>,

    #[arg(long, help = "Query server info and exit")]
    info: bool,

    #[arg(long, requires = "rcon", help = "Rcon password")]
    rcon_password: Option<String>,

    #[arg(long, help = "Send one rcon command and exit")]
    rcon: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server: SocketAddr = args
        .server
        .parse()
        .with_context(|| format!("invalid server address {}", args.server))?;

    let endpoint =
        UdpEndpoint::bind(&args.bind).with_context(|| format!("failed to bind {}", args.bind))?;
    let config = ClientConfig {
        userinfo: format!("name={}", args.name),
        ..Default::default()
    };
    let mut client = ClientHost::new(endpoint, config);

    if args.info {
        return query(&mut client, server, &ConnectionlessPacket::GetInfo { nonce: 1 });
    }
    if let Some(command) = args.rcon.clone() {
        let packet = ConnectionlessPacket::Rcon {
            password: args.rcon_password.clone().unwrap_or_default(),
            command,
        };
        return query(&mut client, server, &packet);
    }

    run(&mut client, server, &args)
}

/// Sends one out-of-band request and prints the first reply.
fn query(
    client: &mut ClientHost<UdpEndpoint>,
    server: SocketAddr,
    packet: &ConnectionlessPacket,
) -> Result<()> {
    client.send_connectionless(packet, server)?;

    let mut reply = None;
    let deadline = Instant::now() + Duration::from_secs(2);
    while reply.is_none() && Instant::now() < deadline {
        match client.transport_mut().poll_receive()? {
            Some((datagram, from)) if from == server => {
                reply = ConnectionlessPacket::deserialize(&datagram).ok();
            }
            Some(_) => {}
            None => thread::sleep(Duration::from_millis(5)),
        }
    }

    match reply {
        Some(ConnectionlessPacket::InfoResponse { info, .. }) => {
            println!(
                "{} | map {} | {}/{} clients | protocol {}",
                info.name, info.map, info.clients, info.max_clients, info.protocol
            );
            Ok(())
        }
        Some(ConnectionlessPacket::Print { text }) => {
            println!("{}", text);
            Ok(())
        }
        Some(other) => bail!("unexpected reply: {:?}", other),
        None => bail!("no reply from {}", server),
    }
}

fn run(client: &mut ClientHost<UdpEndpoint>, server: SocketAddr, args: &Args) -> Result<()> {
    client.connect(server)?;
    log::info!("Connecting to {} from {}", server, client.local_addr());

    let frame = Duration::from_secs_f64(1.0 / args.cmd_rate.max(1) as f64);
    let frame_ms = frame.as_millis().max(1) as i32;
    let mut connected_at = None;
    let mut last_report = Instant::now();
    let mut bot = Bot::new(args.turn_rate);
    let mut stats = SnapshotStats::new();
    let mut server_time = 0i32;

    loop {
        client.poll()?;

        let events: Vec<ClientEvent> = client.drain_events().collect();
        for event in events {
            match &event {
                ClientEvent::Connected { client_num, params } => {
                    log::info!(
                        "Connected as client {} (protocol {}, {} Hz)",
                        client_num,
                        params.protocol,
                        params.tick_rate
                    );
                    connected_at = Some(Instant::now());
                    for command in &args.command {
                        client.send_command(command)?;
                    }
                }
                ClientEvent::Snapshot { snapshot, diff } => {
                    server_time = server_time.max(snapshot.server_time as i32);
                    stats.record(Instant::now(), !snapshot.is_full(), snapshot.entities.len());
                    if !diff.added.is_empty() || !diff.removed.is_empty() {
                        log::debug!("{}", event);
                    }
                }
                ClientEvent::ServerCommand(command) => log::info!("Server: {}", command),
                ClientEvent::Print(text) => log::info!("{}", text),
                ClientEvent::Disconnected { .. } => {
                    bail!("{}", event);
                }
            }
        }

        if client.is_connected() {
            server_time += frame_ms;
            client.send_input(bot.next_command(server_time, frame_ms))?;
        }

        if last_report.elapsed() >= Duration::from_secs(5) && client.is_connected() {
            last_report = Instant::now();
            let loss = client
                .channel()
                .map(|c| c.stats().packet_loss_percent())
                .unwrap_or_default();
            log::info!(
                "{} snapshots ({:.1}/s, {:.0}% delta), {} entities, {:.1}% loss",
                stats.received(),
                stats.rate(),
                stats.delta_percent(),
                stats.entities(),
                loss
            );
        }

        let finished = connected_at.is_some_and(|at: Instant| {
            args.duration > 0 && at.elapsed() >= Duration::from_secs(args.duration)
        });
        if finished {
            break;
        }

        thread::sleep(frame);
    }

    log::info!("Disconnecting");
    client.disconnect();
    Ok(())
}
