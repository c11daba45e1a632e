use log::trace;

/// Reassembly slots; a slot is claimed by `sequence % FRAGMENT_SLOTS`.
pub const FRAGMENT_SLOTS: usize = 4;

/// Largest message the fragment header can describe.
pub const MAX_FRAGMENTED_SIZE: usize = u16::MAX as usize;

/// Reassembly state for one oversized message.
#[derive(Debug)]
pub struct FragmentBuffer {
    sequence: u32,
    total_size: Option<usize>,
    data: Vec<u8>,
    /// Received byte ranges, sorted and merged.
    ranges: Vec<(usize, usize)>,
}

impl FragmentBuffer {
    fn new(sequence: u32) -> Self {
        Self {
            sequence,
            total_size: None,
            data: Vec::new(),
            ranges: Vec::new(),
        }
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Copies one fragment in. Returns false when it contradicts what was already received.
    fn insert(&mut self, offset: usize, total_size: Option<usize>, chunk: &[u8]) -> bool {
        let end = offset + chunk.len();
        if end > MAX_FRAGMENTED_SIZE {
            return false;
        }

        let total = match (self.total_size, total_size) {
            (Some(known), Some(declared)) if known != declared => return false,
            (known, declared) => known.or(declared),
        };
        if let Some(total) = total {
            if end > total || self.ranges.last().is_some_and(|&(_, e)| e > total) {
                return false;
            }
        }
        self.total_size = total;

        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(chunk);
        self.add_range(offset, end);
        true
    }

    fn add_range(&mut self, start: usize, end: usize) {
        if start == end {
            return;
        }
        self.ranges.push((start, end));
        self.ranges.sort_unstable();

        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(self.ranges.len());
        for &(s, e) in &self.ranges {
            match merged.last_mut() {
                Some(last) if s <= last.1 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }
        self.ranges = merged;
    }

    pub fn is_complete(&self) -> bool {
        match self.total_size {
            Some(0) => true,
            Some(total) => self.ranges.first() == Some(&(0, total)),
            None => false,
        }
    }

    pub fn received_bytes(&self) -> usize {
        self.ranges.iter().map(|(s, e)| e - s).sum()
    }

    fn into_message(mut self) -> Vec<u8> {
        let total = self.total_size.unwrap_or(self.data.len());
        self.data.truncate(total);
        self.data
    }
}

/// Fixed set of reassembly buffers. Memory is bounded by
/// `FRAGMENT_SLOTS * MAX_FRAGMENTED_SIZE` whatever the peer sends.
#[derive(Debug, Default)]
pub struct FragmentArena {
    slots: [Option<FragmentBuffer>; FRAGMENT_SLOTS],
}

impl FragmentArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one fragment. Returns the whole message once the last gap is filled.
    ///
    /// A fragment for a different sequence than the slot's current occupant abandons the
    /// partial message in that slot. Inconsistent fragments are ignored.
    pub fn insert(
        &mut self,
        sequence: u32,
        offset: u16,
        total_size: Option<u16>,
        chunk: &[u8],
    ) -> Option<Vec<u8>> {
        let slot = &mut self.slots[sequence as usize % FRAGMENT_SLOTS];

        if slot.as_ref().is_some_and(|buffer| buffer.sequence != sequence) {
            if let Some(abandoned) = slot.take() {
                trace!(
                    "abandoning partial message {} ({} bytes) for {}",
                    abandoned.sequence,
                    abandoned.received_bytes(),
                    sequence
                );
            }
        }

        let buffer = slot.get_or_insert_with(|| FragmentBuffer::new(sequence));
        if !buffer.insert(offset as usize, total_size.map(usize::from), chunk) {
            trace!("inconsistent fragment for {} at offset {}", sequence, offset);
            return None;
        }

        if buffer.is_complete() {
            return slot.take().map(FragmentBuffer::into_message);
        }
        None
    }

    /// Drops partial messages that can no longer be delivered once `sequence` was accepted.
    pub fn discard_through(&mut self, sequence: u32) {
        for slot in &mut self.slots {
            let stale = slot.as_ref().is_some_and(|buffer| {
                !super::protocol::sequence_greater_than(buffer.sequence, sequence)
            });
            if stale {
                *slot = None;
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn clear(&mut self) {
        self.slots = Default::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(message: &[u8], size: usize) -> Vec<(u16, &[u8])> {
        message
            .chunks(size)
            .enumerate()
            .map(|(i, chunk)| ((i * size) as u16, chunk))
            .collect()
    }

    #[test]
    fn test_reassembly_in_reverse_order() {
        let message: Vec<u8> = (0..250u32).map(|i| i as u8).collect();
        let mut arena = FragmentArena::new();
        let parts = chunks(&message, 64);
        let total = Some(message.len() as u16);

        let mut delivered = None;
        for (i, (offset, chunk)) in parts.iter().enumerate().rev() {
            let total = if i == 0 { total } else { None };
            delivered = arena.insert(9, *offset, total, chunk);
        }

        assert_eq!(delivered, Some(message));
        assert_eq!(arena.pending(), 0);
    }

    #[test]
    fn test_missing_fragment_never_delivers() {
        let message = vec![7u8; 200];
        let mut arena = FragmentArena::new();
        let parts = chunks(&message, 50);

        for (i, (offset, chunk)) in parts.iter().enumerate() {
            if i == 2 {
                continue;
            }
            let total = (i == 0).then_some(200);
            assert!(arena.insert(3, *offset, total, chunk).is_none());
        }
        assert_eq!(arena.pending(), 1);
    }

    #[test]
    fn test_duplicate_fragments_are_harmless() {
        let message = vec![1u8, 2, 3, 4, 5, 6];
        let mut arena = FragmentArena::new();

        assert!(arena.insert(1, 0, Some(6), &message[..3]).is_none());
        assert!(arena.insert(1, 0, Some(6), &message[..3]).is_none());
        assert_eq!(arena.insert(1, 3, None, &message[3..]), Some(message));
    }

    #[test]
    fn test_new_sequence_abandons_slot() {
        let mut arena = FragmentArena::new();
        assert!(arena.insert(2, 0, Some(8), &[0; 4]).is_none());
        // same slot, different message
        assert!(arena.insert(2 + FRAGMENT_SLOTS as u32, 4, None, &[0; 4]).is_none());
        // the tail of the original message no longer completes anything
        assert!(arena.insert(2, 4, None, &[0; 4]).is_none());
    }

    #[test]
    fn test_fragment_past_total_is_rejected() {
        let mut arena = FragmentArena::new();
        assert!(arena.insert(5, 0, Some(4), &[0; 4]).is_some());
        assert!(arena.insert(6, 0, Some(4), &[0; 2]).is_none());
        assert!(arena.insert(6, 2, None, &[0; 4]).is_none());
        assert_eq!(arena.insert(6, 2, None, &[0; 2]), Some(vec![0; 4]));
    }

    #[test]
    fn test_discard_through_clears_older_slots() {
        let mut arena = FragmentArena::new();
        arena.insert(10, 0, Some(8), &[0; 4]);
        arena.insert(13, 0, Some(8), &[0; 4]);
        arena.discard_through(11);
        assert_eq!(arena.pending(), 1);
    }
}
