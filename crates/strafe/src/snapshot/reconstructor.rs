use crate::bitstream::{read_delta, BitReader};
use crate::net::{sequence_greater_than, ENTITY_BITS, ENTITY_SENTINEL, PACKET_BACKUP};

use super::buffer::SnapshotRing;
use super::entity::EntityState;
use super::error::SnapshotError;
use super::frame::{Snapshot, SnapshotDiff};
use super::player::PlayerState;

/// Client-side snapshot history. Applies snapshots in increasing sequence order only.
#[derive(Debug)]
pub struct SnapshotReconstructor {
    history: SnapshotRing<Snapshot>,
    last_applied: Option<u32>,
    needs_full: bool,
}

impl Default for SnapshotReconstructor {
    fn default() -> Self {
        Self::new(PACKET_BACKUP)
    }
}

impl SnapshotReconstructor {
    pub fn new(backup: usize) -> Self {
        Self {
            history: SnapshotRing::new(backup),
            last_applied: None,
            needs_full: false,
        }
    }

    /// Reads one snapshot from `reader` and applies it.
    ///
    /// The whole snapshot is consumed even when it is rejected, so the reader is left
    /// positioned after it.
    pub fn read_snapshot(
        &mut self,
        reader: &mut BitReader<'_>,
    ) -> Result<(Snapshot, SnapshotDiff), SnapshotError> {
        let sequence = reader.read_u32()?;
        let server_time = reader.read_u32()?;
        let delta_from = if reader.read_bit()? {
            let distance = reader.read_u8()? as u32;
            Some(sequence.wrapping_sub(distance))
        } else {
            None
        };

        let empty = Snapshot::default();
        let baseline = match delta_from {
            Some(from) => self.history.get(from),
            None => Some(&empty),
        };
        let missing = baseline.is_none();
        let baseline = baseline.unwrap_or(&empty);

        let player: PlayerState = read_delta(reader, &baseline.player)?;
        let entities = read_entities(reader, &baseline.entities)?;

        match self.last_applied {
            Some(last) if !sequence_greater_than(sequence, last) => {
                return Err(SnapshotError::Stale { sequence, last });
            }
            _ => {}
        }

        if let (true, Some(from)) = (missing, delta_from) {
            log::debug!("snapshot {sequence} delta from {from} which is no longer held");
            self.needs_full = true;
            return Err(SnapshotError::MissingBaseline {
                sequence,
                baseline: from,
            });
        }

        let snapshot = Snapshot {
            sequence,
            server_time,
            delta_from,
            player,
            entities,
        };

        let previous = self.last_applied.and_then(|last| self.history.get(last));
        let diff = SnapshotDiff::between(previous, &snapshot);

        if delta_from.is_none() {
            self.needs_full = false;
        }
        self.history.push(snapshot.clone());
        self.history
            .evict_older_than(sequence.wrapping_sub(self.history.capacity() as u32 - 1));
        self.last_applied = Some(sequence);

        Ok((snapshot, diff))
    }

    /// Whether the client should ask for a snapshot without a baseline.
    pub fn needs_full(&self) -> bool {
        self.needs_full || self.last_applied.is_none()
    }

    pub fn last_applied(&self) -> Option<u32> {
        self.last_applied
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.last_applied.and_then(|last| self.history.get(last))
    }

    pub fn get(&self, sequence: u32) -> Option<&Snapshot> {
        self.history.get(sequence)
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last_applied = None;
        self.needs_full = false;
    }
}

fn read_entities(
    reader: &mut BitReader<'_>,
    baseline: &[EntityState],
) -> Result<Vec<EntityState>, SnapshotError> {
    let mut entities = Vec::with_capacity(baseline.len());
    let mut old = baseline.iter().peekable();
    let mut previous: Option<u16> = None;

    loop {
        let number = reader.read_bits(ENTITY_BITS)? as u16;
        if number == ENTITY_SENTINEL {
            break;
        }
        match previous {
            Some(previous) if number <= previous => {
                return Err(SnapshotError::EntityOrder { number, previous });
            }
            _ => {}
        }
        previous = Some(number);

        // baseline entities skipped by the list are carried over untouched
        while let Some(carried) = old.next_if(|e| e.number < number) {
            entities.push(*carried);
        }

        let base = match old.next_if(|e| e.number == number) {
            Some(existing) => *existing,
            None => EntityState::baseline(number),
        };

        if reader.read_bit()? {
            continue;
        }
        entities.push(read_delta(reader, &base)?);
    }

    entities.extend(old.copied());
    Ok(entities)
}
