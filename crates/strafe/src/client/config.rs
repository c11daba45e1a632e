use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::{ChannelConfig, PACKET_BACKUP};

/// User commands repeated in every client packet.
pub const CMD_BACKUP: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub userinfo: String,
    pub channel: ChannelConfig,
    pub resend_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub cmd_backup: usize,
    pub snapshot_backup: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            userinfo: "name=player".to_owned(),
            channel: ChannelConfig::default(),
            resend_interval_ms: 1_000,
            connect_timeout_ms: 10_000,
            cmd_backup: CMD_BACKUP,
            snapshot_backup: PACKET_BACKUP,
        }
    }
}

impl ClientConfig {
    pub fn resend_interval(&self) -> Duration {
        Duration::from_millis(self.resend_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
