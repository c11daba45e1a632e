mod config;
mod events;
mod host;
mod session;

pub use config::ServerConfig;
pub use events::{DisconnectReason, ServerEvent};
pub use host::ServerHost;
pub use session::{userinfo_value, ClientSession, SessionTable, MAX_CLIENTS};
