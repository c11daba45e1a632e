use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use strafe::{
    EntityType, EntityWorld, NetError, PlayerState, ServerConfig, ServerEvent, ServerHost,
    Transport, WorldSource,
};

use crate::events::log_event;
use crate::simulation::{apply_usercmd, populate, simulate_world};

/// Dedicated server: the protocol host plus a small demo arena.
pub struct GameServer<T> {
    host: ServerHost<T>,
    world: EntityWorld,
    /// Entity each connected client controls.
    avatars: HashMap<u32, u16>,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    running: Arc<AtomicBool>,
}

impl<T: Transport> GameServer<T> {
    pub fn new(transport: T, config: ServerConfig) -> Self {
        let host = ServerHost::new(transport, config);
        let mut world = EntityWorld::new();
        populate(&mut world);

        Self {
            tick_duration: host.tick_duration(),
            host,
            world,
            avatars: HashMap::new(),
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.host.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            std::thread::sleep(Duration::from_millis(1));
        }
        self.host.shutdown();
        self.drain_events();
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        self.accumulator += now - self.last_tick_time;
        self.last_tick_time = now;

        if let Err(e) = self.host.poll() {
            log::error!("Network error: {}", e);
        }
        self.drain_events();

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.tick();
        }
    }

    fn tick(&mut self) {
        simulate_world(&mut self.world, self.tick_duration.as_secs_f32());
        self.world.advance_tick();

        match self.host.send_snapshots(&self.world) {
            Ok(()) => {}
            Err(NetError::Snapshot(e)) => log::error!("Snapshot build failed: {}", e),
            Err(e) => log::error!("Failed to send snapshots: {}", e),
        }
        self.drain_events();
    }

    fn drain_events(&mut self) {
        let events: Vec<ServerEvent> = self.host.drain_events().collect();
        for event in events {
            log_event(&event);
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ClientConnected { client_num, .. } => self.spawn_avatar(client_num),
            ServerEvent::ClientDisconnected { client_num, .. } => self.despawn_avatar(client_num),
            ServerEvent::UserCommands {
                client_num,
                commands,
            } => {
                let Some(&number) = self.avatars.get(&client_num) else {
                    return;
                };
                let mut player = self.world.player_state(client_num as u8);
                if let Some(entity) = self.world.get_mut(number) {
                    for cmd in &commands {
                        apply_usercmd(&mut player, entity, cmd);
                    }
                }
                self.world.set_player(player);
            }
            ServerEvent::ClientCommand {
                client_num,
                command,
            } => self.client_command(client_num, &command),
            ServerEvent::Rcon { addr, command } => {
                let reply = self.rcon(&command);
                if let Err(e) = self.host.send_print(addr, &reply) {
                    log::warn!("Rcon reply to {} failed: {}", addr, e);
                }
            }
            ServerEvent::ConnectionDenied { .. } => {}
        }
    }

    fn spawn_avatar(&mut self, client_num: u32) {
        self.despawn_avatar(client_num);
        let Some(number) = self.world.spawn(EntityType::Player) else {
            log::warn!("No entity slot left for client {}", client_num);
            return;
        };
        self.world.set_player(PlayerState::new(client_num as u8));
        self.avatars.insert(client_num, number);
    }

    fn despawn_avatar(&mut self, client_num: u32) {
        if let Some(number) = self.avatars.remove(&client_num) {
            self.world.despawn(number);
        }
        self.world.remove_player(client_num as u8);
    }

    fn client_command(&mut self, client_num: u32, command: &str) {
        let (verb, rest) = command.split_once(' ').unwrap_or((command, ""));
        match verb {
            "say" => {
                let name = self
                    .host
                    .session(client_num)
                    .map_or_else(|| format!("client {}", client_num), |s| s.name().to_owned());
                self.host.broadcast_command(&format!("print {}: {}", name, rest));
            }
            "disconnect" => self.host.kick(client_num, "disconnected"),
            _ => {
                if let Err(e) = self
                    .host
                    .send_command(client_num, &format!("print unknown command: {}", verb))
                {
                    log::debug!("Client {}: {}", client_num, e);
                }
            }
        }
    }

    fn rcon(&mut self, command: &str) -> String {
        let (verb, rest) = command.split_once(' ').unwrap_or((command, ""));
        match verb {
            "status" => {
                let info = self.host.server_info();
                let mut lines = vec![format!(
                    "{} on {}: {}/{} clients, tick {}",
                    info.name,
                    info.map,
                    info.clients,
                    info.max_clients,
                    self.world.tick()
                )];
                for session in self.host.sessions().iter() {
                    lines.push(format!(
                        "{:>3} {:<16} {:>4}ms {}",
                        session.client_num,
                        session.name(),
                        session.ping_ms(),
                        session.addr()
                    ));
                }
                lines.join("\n")
            }
            "kick" => match rest.trim().parse::<u32>() {
                Ok(client_num) if self.host.session(client_num).is_some() => {
                    self.host.kick(client_num, "kicked by admin");
                    format!("kicked client {}", client_num)
                }
                _ => format!("no such client: {}", rest.trim()),
            },
            "say" => {
                self.host.broadcast_command(&format!("print console: {}", rest));
                String::new()
            }
            "quit" => {
                self.running.store(false, Ordering::SeqCst);
                "shutting down".to_owned()
            }
            _ => format!("unknown command: {}", verb),
        }
    }
}
