use std::collections::VecDeque;
use std::time::Instant;

const SAMPLE_COUNT: usize = 60;

/// Sliding-window view of the snapshot stream.
pub struct SnapshotStats {
    arrivals: VecDeque<Instant>,
    rate: f32,
    received: u64,
    deltas: u64,
    entities: usize,
}

impl Default for SnapshotStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStats {
    pub fn new() -> Self {
        Self {
            arrivals: VecDeque::with_capacity(SAMPLE_COUNT),
            rate: 0.0,
            received: 0,
            deltas: 0,
            entities: 0,
        }
    }

    pub fn record(&mut self, at: Instant, delta: bool, entities: usize) {
        self.received += 1;
        if delta {
            self.deltas += 1;
        }
        self.entities = entities;

        if self.arrivals.len() >= SAMPLE_COUNT {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back(at);

        if let Some(oldest) = self.arrivals.front() {
            let elapsed = at.duration_since(*oldest).as_secs_f32();
            if elapsed > 0.0 {
                self.rate = (self.arrivals.len() - 1) as f32 / elapsed;
            }
        }
    }

    /// Snapshots per second over the last window.
    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Share of snapshots that arrived delta-compressed, in percent.
    pub fn delta_percent(&self) -> f32 {
        if self.received == 0 {
            return 0.0;
        }
        self.deltas as f32 / self.received as f32 * 100.0
    }

    pub fn entities(&self) -> usize {
        self.entities
    }
}
