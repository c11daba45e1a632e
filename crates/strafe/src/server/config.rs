use serde::{Deserialize, Serialize};

use crate::net::{ChannelConfig, DispatcherConfig, DEFAULT_TICK_RATE};
use crate::snapshot::SnapshotConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub map: String,
    pub tick_rate: u32,
    pub max_clients: usize,
    pub channel: ChannelConfig,
    pub snapshot: SnapshotConfig,
    pub dispatcher: DispatcherConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "strafe".to_owned(),
            map: "void".to_owned(),
            tick_rate: DEFAULT_TICK_RATE,
            max_clients: 32,
            channel: ChannelConfig::default(),
            snapshot: SnapshotConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}
