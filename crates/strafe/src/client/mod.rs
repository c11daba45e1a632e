mod config;
mod events;
mod host;

pub use config::{ClientConfig, CMD_BACKUP};
pub use events::ClientEvent;
pub use host::{ClientHost, ClientState};
