use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::bitstream::{quantize, write_delta, BitWriter, MAX_MESSAGE_SIZE};
use crate::net::{
    next_sequence, sequence_greater_than, RttEstimator, ENTITY_BITS, ENTITY_SENTINEL,
    PACKET_BACKUP,
};

use super::buffer::{Sequenced, SnapshotRing};
use super::entity::EntityState;
use super::error::SnapshotError;
use super::frame::Snapshot;
use super::player::PlayerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Send a full snapshot once this many snapshots went out without an acknowledgment.
    pub max_unacked_snapshots: u32,
    /// Send a snapshot every Nth server tick.
    pub snapshot_divider: u32,
    /// Frames kept as candidate baselines.
    pub backup: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_unacked_snapshots: 16,
            snapshot_divider: 1,
            backup: PACKET_BACKUP,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SentFrame {
    pub snapshot: Snapshot,
    pub sent_at: Instant,
}

impl Sequenced for SentFrame {
    fn sequence(&self) -> u32 {
        self.snapshot.sequence
    }
}

/// Per-client snapshot bookkeeping on the server.
#[derive(Debug)]
pub struct ConnectionState {
    config: SnapshotConfig,
    frames: SnapshotRing<SentFrame>,
    next_sequence: u32,
    last_acked: Option<u32>,
    resync_requested: bool,
    rtt: RttEstimator,
    ticks: u64,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new(SnapshotConfig::default())
    }
}

impl ConnectionState {
    pub fn new(config: SnapshotConfig) -> Self {
        let max_distance = config.max_unacked_snapshots.clamp(1, u8::MAX as u32);
        let config = SnapshotConfig {
            max_unacked_snapshots: max_distance,
            snapshot_divider: config.snapshot_divider.max(1),
            backup: config.backup.max(max_distance as usize + 1),
        };
        Self {
            frames: SnapshotRing::new(config.backup),
            config,
            next_sequence: 1,
            last_acked: None,
            resync_requested: false,
            rtt: RttEstimator::new(),
            ticks: 0,
        }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Advances the tick counter and reports whether a snapshot is due this tick.
    pub fn tick(&mut self) -> bool {
        let due = self.ticks % self.config.snapshot_divider as u64 == 0;
        self.ticks += 1;
        due
    }

    /// Records the client's acknowledgment of `sequence`. Returns whether it advanced the
    /// baseline.
    pub fn acknowledge(&mut self, sequence: u32, now: Instant) -> bool {
        if self
            .last_acked
            .is_some_and(|last| !sequence_greater_than(sequence, last))
        {
            return false;
        }

        let Some(frame) = self.frames.get(sequence) else {
            log::debug!("ack for unknown snapshot {sequence}");
            return false;
        };

        self.rtt.record(now.saturating_duration_since(frame.sent_at));
        self.last_acked = Some(sequence);
        true
    }

    /// The next snapshot goes out without a baseline.
    pub fn request_full(&mut self) {
        self.resync_requested = true;
    }

    pub fn reset(&mut self) {
        self.frames.clear();
        self.last_acked = None;
        self.resync_requested = false;
        self.rtt = RttEstimator::new();
        self.ticks = 0;
    }

    pub fn last_acked(&self) -> Option<u32> {
        self.last_acked
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn frame(&self, sequence: u32) -> Option<&Snapshot> {
        self.frames.get(sequence).map(|f| &f.snapshot)
    }

    fn baseline(&self) -> Option<&Snapshot> {
        if self.resync_requested {
            return None;
        }
        let acked = self.last_acked?;
        let distance = self.next_sequence.wrapping_sub(acked);
        if distance == 0 || distance > self.config.max_unacked_snapshots {
            return None;
        }
        self.frames.get(acked).map(|f| &f.snapshot)
    }
}

/// One encoded snapshot, ready to follow a `ServerOp::Snapshot` byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSnapshot {
    pub sequence: u32,
    pub delta_from: Option<u32>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct SnapshotBuilder {
    max_message_size: usize,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

impl SnapshotBuilder {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Encodes the visible `entities` and `player` against the client's baseline.
    ///
    /// The frame is stored as a candidate baseline only when encoding succeeds; on error
    /// the connection state is unchanged.
    pub fn build<'a>(
        &self,
        state: &mut ConnectionState,
        server_time: u32,
        player: &PlayerState,
        entities: impl IntoIterator<Item = &'a EntityState>,
    ) -> Result<EncodedSnapshot, SnapshotError> {
        let mut current: Vec<EntityState> = entities.into_iter().map(quantize).collect();
        current.sort_by_key(|e| e.number);
        current.dedup_by_key(|e| e.number);
        if let Some(bad) = current.iter().find(|e| e.number >= ENTITY_SENTINEL) {
            return Err(SnapshotError::EntityOutOfRange(bad.number as u32));
        }
        let player = quantize(player);

        let sequence = state.next_sequence;
        let baseline = state.baseline();
        let delta_from = baseline.map(|b| b.sequence);

        let mut writer = BitWriter::with_limit(self.max_message_size);
        writer.write_u32(sequence);
        writer.write_u32(server_time);
        match delta_from {
            Some(from) => {
                let distance = sequence.wrapping_sub(from);
                let distance =
                    u8::try_from(distance).map_err(|_| SnapshotError::DeltaTooFar(distance))?;
                writer.write_bit(true);
                writer.write_u8(distance);
            }
            None => writer.write_bit(false),
        }

        let empty = Vec::new();
        let (old_player, old_entities) = match baseline {
            Some(b) => (b.player, &b.entities),
            None => (PlayerState::default(), &empty),
        };

        write_delta(&mut writer, &old_player, &player)?;
        write_entities(&mut writer, old_entities, &current)?;
        writer.write_bits(ENTITY_SENTINEL as u32, ENTITY_BITS);

        let bytes = writer.finish()?;

        log::trace!(
            "snapshot {sequence}: {} entities, {} bytes, baseline {delta_from:?}",
            current.len(),
            bytes.len()
        );

        state.frames.push(SentFrame {
            snapshot: Snapshot {
                sequence,
                server_time,
                delta_from,
                player,
                entities: current,
            },
            sent_at: Instant::now(),
        });
        state.next_sequence = next_sequence(sequence);
        if delta_from.is_none() {
            state.resync_requested = false;
        }

        Ok(EncodedSnapshot {
            sequence,
            delta_from,
            bytes,
        })
    }
}

/// Merge-joins two entity lists sorted by number.
fn write_entities(
    writer: &mut BitWriter,
    old: &[EntityState],
    new: &[EntityState],
) -> Result<(), SnapshotError> {
    let mut old_iter = old.iter().peekable();
    let mut new_iter = new.iter().peekable();

    loop {
        match (old_iter.peek().copied(), new_iter.peek().copied()) {
            (None, None) => return Ok(()),
            (Some(o), Some(n)) if o.number == n.number => {
                writer.write_bits(n.number as u32, ENTITY_BITS);
                writer.write_bit(false);
                write_delta(writer, o, n)?;
                old_iter.next();
                new_iter.next();
            }
            (Some(o), Some(n)) if n.number < o.number => {
                write_spawn(writer, n)?;
                new_iter.next();
            }
            (Some(o), _) => {
                writer.write_bits(o.number as u32, ENTITY_BITS);
                writer.write_bit(true);
                old_iter.next();
            }
            (None, Some(n)) => {
                write_spawn(writer, n)?;
                new_iter.next();
            }
        }
    }
}

fn write_spawn(writer: &mut BitWriter, entity: &EntityState) -> Result<(), SnapshotError> {
    writer.write_bits(entity.number as u32, ENTITY_BITS);
    writer.write_bit(false);
    write_delta(writer, &EntityState::baseline(entity.number), entity)?;
    Ok(())
}
