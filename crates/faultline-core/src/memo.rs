//! Bounded per-pair message memoization.
//!
//! Each ordered pair keeps the most recent `capacity` processed messages
//! together with the decision taken on them, most-recent-first. Capacity is
//! sized to the node count so a broadcast resent across every peer still
//! finds its original entry.

use std::collections::VecDeque;

use crate::action::ActionDecision;

/// One processed message and the decision that was taken on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoEntry {
    /// Raw payload as intercepted.
    pub raw: Vec<u8>,
    /// Decision produced for it (final payload, delay, duplicates).
    pub decision: ActionDecision,
}

/// Bounded most-recent-first history for one ordered pair.
#[derive(Debug)]
pub struct MemoBuffer {
    capacity: usize,
    entries: VecDeque<MemoEntry>,
}

impl MemoBuffer {
    /// New buffer holding at most `capacity` entries. Capacity must be
    /// positive.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "memo capacity must be positive");
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Append an entry, evicting the oldest past capacity.
    pub fn push(&mut self, entry: MemoEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(entry);
    }

    /// Most recent entry with a byte-identical raw payload, if any.
    pub fn find(&self, raw: &[u8]) -> Option<&MemoEntry> {
        self.entries.iter().find(|entry| entry.raw == raw)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(raw: &[u8], delay: u32) -> MemoEntry {
        MemoEntry {
            raw: raw.to_vec(),
            decision: ActionDecision::delay(raw.to_vec(), delay),
        }
    }

    #[test]
    fn find_returns_most_recent_match() {
        let mut buffer = MemoBuffer::new(4);
        buffer.push(entry(b"x", 10));
        buffer.push(entry(b"y", 20));
        buffer.push(entry(b"x", 30));
        let hit = buffer.find(b"x").unwrap();
        assert_eq!(hit.decision.delay_ms, 30);
    }

    #[test]
    fn eviction_drops_the_oldest() {
        let mut buffer = MemoBuffer::new(2);
        buffer.push(entry(b"a", 1));
        buffer.push(entry(b"b", 2));
        buffer.push(entry(b"c", 3));
        assert_eq!(buffer.len(), 2);
        assert!(buffer.find(b"a").is_none());
        assert!(buffer.find(b"b").is_some());
        assert!(buffer.find(b"c").is_some());
    }

    #[test]
    fn clear_empties_the_buffer() {
        let mut buffer = MemoBuffer::new(2);
        buffer.push(entry(b"a", 1));
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.find(b"a").is_none());
    }
}
