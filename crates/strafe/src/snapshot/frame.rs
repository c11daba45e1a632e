use std::collections::BTreeSet;

use super::buffer::Sequenced;
use super::entity::EntityState;
use super::player::PlayerState;

/// One tick of world state as one client sees it.
///
/// Entities are kept sorted by `number`, the order they travel on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub sequence: u32,
    pub server_time: u32,
    /// Sequence of the baseline this snapshot was delta-encoded against.
    pub delta_from: Option<u32>,
    pub player: PlayerState,
    pub entities: Vec<EntityState>,
}

impl Sequenced for Snapshot {
    fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl Snapshot {
    pub fn entity(&self, number: u16) -> Option<&EntityState> {
        self.entities
            .binary_search_by_key(&number, |e| e.number)
            .ok()
            .map(|index| &self.entities[index])
    }

    pub fn is_full(&self) -> bool {
        self.delta_from.is_none()
    }
}

/// Entity ids that appeared, disappeared or changed between two applied snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<u16>,
    pub removed: Vec<u16>,
    pub changed: Vec<u16>,
}

impl SnapshotDiff {
    pub fn between(previous: Option<&Snapshot>, current: &Snapshot) -> Self {
        let mut diff = Self::default();
        let Some(previous) = previous else {
            diff.added = current.entities.iter().map(|e| e.number).collect();
            return diff;
        };

        let before: BTreeSet<u16> = previous.entities.iter().map(|e| e.number).collect();
        for entity in &current.entities {
            match previous.entity(entity.number) {
                None => diff.added.push(entity.number),
                Some(old) if old != entity => diff.changed.push(entity.number),
                Some(_) => {}
            }
        }
        diff.removed = before
            .into_iter()
            .filter(|number| current.entity(*number).is_none())
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}
