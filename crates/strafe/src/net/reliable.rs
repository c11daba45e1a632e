use std::collections::VecDeque;

use super::error::NetError;
use super::protocol::{sequence_greater_than, MAX_RELIABLE_WINDOW};

/// Outgoing reliable commands awaiting acknowledgment.
///
/// Indices start at 1; an acknowledgment of 0 means nothing has been received yet.
#[derive(Debug)]
pub struct ReliableQueue {
    commands: VecDeque<String>,
    first_index: u32,
    window: usize,
}

impl ReliableQueue {
    pub fn new(window: usize) -> Self {
        let window = window.clamp(1, MAX_RELIABLE_WINDOW);
        Self {
            commands: VecDeque::with_capacity(window),
            first_index: 1,
            window,
        }
    }

    /// Queues a command and returns its index.
    pub fn push(&mut self, command: String) -> Result<u32, NetError> {
        if self.commands.len() >= self.window {
            return Err(NetError::ReliableOverflow {
                window: self.window,
            });
        }

        let index = self.first_index.wrapping_add(self.commands.len() as u32);
        self.commands.push_back(command);
        Ok(index)
    }

    /// Releases every command up to and including `ack`. Acks for indices never sent
    /// are ignored.
    pub fn acknowledge(&mut self, ack: u32) {
        let last_sent = self.last_index();
        if sequence_greater_than(ack, last_sent) {
            return;
        }

        while !self.commands.is_empty() && !sequence_greater_than(self.first_index, ack) {
            self.commands.pop_front();
            self.first_index = self.first_index.wrapping_add(1);
        }
    }

    /// Index of the newest command ever queued, or `first_index - 1` when empty.
    pub fn last_index(&self) -> u32 {
        self.first_index
            .wrapping_add(self.commands.len() as u32)
            .wrapping_sub(1)
    }

    pub fn first_index(&self) -> u32 {
        self.first_index
    }

    pub fn unacknowledged(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

/// Incoming reliable commands, delivered in order and exactly once per index.
#[derive(Debug, Default)]
pub struct ReliableInbox {
    acknowledged: u32,
    delivered: VecDeque<String>,
}

impl ReliableInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a run of commands starting at `first_index`. Already seen indices are
    /// skipped; a run that starts past the next expected index is ignored.
    pub fn receive<I>(&mut self, first_index: u32, commands: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut accepted = 0;
        let mut index = first_index;

        for command in commands {
            let expected = self.acknowledged.wrapping_add(1);
            if index == expected {
                self.delivered.push_back(command);
                self.acknowledged = expected;
                accepted += 1;
            } else if sequence_greater_than(index, expected) {
                break;
            }
            index = index.wrapping_add(1);
        }

        accepted
    }

    /// Highest contiguous index received, echoed back to the sender.
    pub fn acknowledged(&self) -> u32 {
        self.acknowledged
    }

    pub fn drain(&mut self) -> impl Iterator<Item = String> + '_ {
        self.delivered.drain(..)
    }

    pub fn clear(&mut self) {
        self.delivered.clear();
    }
}
