mod events;
mod server;
mod simulation;

use anyhow::{Context, Result};
use clap::Parser;

use strafe::net::DuplicateConnectPolicy;
use strafe::{
    DispatcherConfig, NetworkSimulator, PacketLossSimulation, QueuedUdpEndpoint, ServerConfig,
    Transport,
};

use server::GameServer;

#[derive(Parser)]
#[command(name = "strafe-server")]
#[command(about = "Strafe dedicated server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = strafe::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = strafe::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(long, default_value = "strafe")]
    name: String,

    #[arg(long, default_value = "void")]
    map: String,

    #[arg(long, help = "Enable rcon with this password")]
    rcon_password: Option<String>,

    #[arg(long, help = "Ignore a second connect from an already connected address")]
    ignore_duplicates: bool,

    #[arg(long, help = "Enable global packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ms")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ms")]
    max_latency: u32,

    #[arg(long, default_value_t = 0, help = "Jitter in ms")]
    jitter: u32,

    #[arg(long, default_value_t = 0.0, help = "Duplicated packet percentage (0-100)")]
    duplicate_percent: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let config = ServerConfig {
        name: args.name.clone(),
        map: args.map.clone(),
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        dispatcher: DispatcherConfig {
            rcon_password: args.rcon_password.clone(),
            duplicate_connect: if args.ignore_duplicates {
                DuplicateConnectPolicy::Ignore
            } else {
                DuplicateConnectPolicy::Replace
            },
            ..Default::default()
        },
        ..Default::default()
    };

    let endpoint = QueuedUdpEndpoint::bind(&bind_addr)
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    let transport: Box<dyn Transport> = if args.simulate_packet_loss {
        let simulation = PacketLossSimulation {
            enabled: true,
            loss_percent: args.loss_percent,
            min_latency_ms: args.min_latency,
            max_latency_ms: args.max_latency,
            jitter_ms: args.jitter,
            duplicate_percent: args.duplicate_percent,
        };
        log::info!("Simulating network conditions: {:?}", simulation);
        Box::new(NetworkSimulator::new(endpoint, simulation))
    } else {
        Box::new(endpoint)
    };

    let mut server = GameServer::new(transport, config);
    log::info!("Server started on {}", server.local_addr());
    server.run();
    log::info!("Server shutting down");

    Ok(())
}
