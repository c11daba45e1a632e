use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
    pub duplicate_percent: f32,
}

impl PacketLossSimulation {
    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rand_percent() < self.loss_percent
    }

    pub fn should_duplicate(&self) -> bool {
        if !self.enabled || self.duplicate_percent <= 0.0 {
            return false;
        }
        rand_percent() < self.duplicate_percent
    }

    pub fn delay_ms(&self) -> u32 {
        if !self.enabled || self.max_latency_ms == 0 {
            return 0;
        }
        let base = self.min_latency_ms;
        let range = self.max_latency_ms.saturating_sub(self.min_latency_ms);
        let jitter = if self.jitter_ms > 0 {
            (rand_percent() / 100.0 * self.jitter_ms as f32) as u32
        } else {
            0
        };
        base + (rand_percent() / 100.0 * range as f32) as u32 + jitter
    }
}

/// Per-channel traffic counters.
#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Sequences skipped over by an accepted message.
    pub packets_dropped: u64,
    /// Stale or repeated sequences.
    pub packets_duplicated: u64,
    pub packets_malformed: u64,
    pub fragments_sent: u64,
    pub fragments_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl NetworkStats {
    pub fn packet_loss_percent(&self) -> f32 {
        let expected = self.packets_dropped + self.messages_received();
        if expected == 0 {
            return 0.0;
        }
        self.packets_dropped as f32 / expected as f32 * 100.0
    }

    fn messages_received(&self) -> u64 {
        self.packets_received
            .saturating_sub(self.packets_duplicated + self.packets_malformed)
    }
}

/// Uniform in `0.0..=100.0`.
pub fn rand_percent() -> f32 {
    rand::thread_rng().gen_range(0.0..=100.0)
}

/// Drawn from the thread-local CSPRNG; challenge salts come from here.
pub fn rand_u64() -> u64 {
    rand::random()
}
