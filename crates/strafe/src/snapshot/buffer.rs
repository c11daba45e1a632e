use crate::net::sequence_greater_than;

pub trait Sequenced {
    fn sequence(&self) -> u32;
}

/// Fixed ring of frames indexed by `sequence % capacity`. A newer frame silently evicts
/// whatever older frame shared its slot.
#[derive(Debug)]
pub struct SnapshotRing<T> {
    slots: Vec<Option<T>>,
    capacity: usize,
}

impl<T: Sequenced> SnapshotRing<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "snapshot ring needs at least one slot");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            capacity,
        }
    }

    pub fn push(&mut self, frame: T) {
        let index = (frame.sequence() as usize) % self.capacity;
        self.slots[index] = Some(frame);
    }

    pub fn get(&self, sequence: u32) -> Option<&T> {
        let index = (sequence as usize) % self.capacity;
        self.slots[index]
            .as_ref()
            .filter(|f| f.sequence() == sequence)
    }

    pub fn get_mut(&mut self, sequence: u32) -> Option<&mut T> {
        let index = (sequence as usize) % self.capacity;
        self.slots[index]
            .as_mut()
            .filter(|f| f.sequence() == sequence)
    }

    pub fn latest(&self) -> Option<&T> {
        self.slots
            .iter()
            .flatten()
            .reduce(|best, f| {
                if sequence_greater_than(f.sequence(), best.sequence()) {
                    f
                } else {
                    best
                }
            })
    }

    /// Drops every frame older than `sequence`.
    pub fn evict_older_than(&mut self, sequence: u32) {
        for slot in &mut self.slots {
            if slot
                .as_ref()
                .is_some_and(|f| sequence_greater_than(sequence, f.sequence()))
            {
                *slot = None;
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Frame(u32);

    impl Sequenced for Frame {
        fn sequence(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn o1_lookup() {
        let mut ring = SnapshotRing::new(64);

        for sequence in 0..100 {
            ring.push(Frame(sequence));
        }

        assert_eq!(ring.get(50).unwrap().0, 50);
        assert!(ring.get(30).is_none());
        assert_eq!(ring.len(), 64);
    }

    #[test]
    fn test_latest_across_wrap() {
        let mut ring = SnapshotRing::new(8);
        ring.push(Frame(u32::MAX - 2));
        ring.push(Frame(1));
        assert_eq!(ring.latest().unwrap().0, 1);
    }

    #[test]
    fn test_evict_older_than() {
        let mut ring = SnapshotRing::new(8);
        for sequence in 10..15 {
            ring.push(Frame(sequence));
        }
        ring.evict_older_than(13);
        assert_eq!(ring.len(), 2);
        assert!(ring.get(12).is_none());
        assert!(ring.get(13).is_some());
    }
}
