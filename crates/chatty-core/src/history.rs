use std::collections::VecDeque;

use chatty_protocol::{Nick, OpCode};

/// A message that has come to rest in some user's history: the header has
/// already been retagged to `TXT_MESSAGE`/`FILE_MESSAGE` by the caller.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub op: OpCode,
    pub sender: Nick,
    pub payload: Vec<u8>,
}

/// Bounded FIFO of delivered messages for one user. Pushing onto a full
/// history drops the oldest entry first. Every read is a deep copy so the
/// registry lock can be released before a (potentially slow) send loop.
#[derive(Debug, Clone)]
pub struct BoundedHistory {
    capacity: usize,
    entries: VecDeque<HistoryEntry>,
}

impl BoundedHistory {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: VecDeque::new() }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(payload: &[u8]) -> HistoryEntry {
        HistoryEntry {
            op: OpCode::TxtMessage,
            sender: Nick::from_str_truncate("alice"),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn drops_oldest_when_full() {
        let mut h = BoundedHistory::new(2);
        h.push(entry(b"1"));
        h.push(entry(b"2"));
        h.push(entry(b"3"));
        let snap = h.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].payload, b"2");
        assert_eq!(snap[1].payload, b"3");
    }

    #[test]
    fn snapshot_is_a_deep_copy() {
        let mut h = BoundedHistory::new(4);
        h.push(entry(b"original"));
        let mut snap = h.snapshot();
        snap[0].payload = b"mutated".to_vec();
        assert_eq!(h.snapshot()[0].payload, b"original");
    }
}
