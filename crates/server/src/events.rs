use strafe::server::userinfo_value;
use strafe::ServerEvent;

/// Logs one host event at the level an operator cares about.
pub fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::ClientConnected {
            client_num,
            addr,
            userinfo,
        } => {
            let name = userinfo_value(userinfo, "name").unwrap_or("unnamed");
            log::info!("Client {} ({}) connected from {}", client_num, name, addr);
        }
        ServerEvent::ClientDisconnected { client_num, reason } => {
            log::info!("Client {} {}", client_num, reason.as_str());
        }
        ServerEvent::ConnectionDenied { addr, reason } => {
            log::warn!("Connection denied to {}: {}", addr, reason);
        }
        ServerEvent::UserCommands {
            client_num,
            commands,
        } => {
            log::trace!("Client {}: {} new usercmds", client_num, commands.len());
        }
        ServerEvent::ClientCommand {
            client_num,
            command,
        } => {
            log::info!("Client {}: {}", client_num, command);
        }
        ServerEvent::Rcon { addr, command } => {
            log::info!("Rcon from {}: {}", addr, command);
        }
    }
}
