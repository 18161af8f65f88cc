//! Fixed-capacity, oldest-first event log.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::models::event::EventRecord;

/// Reference capacity used when nothing else is configured.
pub const DEFAULT_MAX_LOGS: usize = 500;

/// Append-only ring of the most recent events.
///
/// Entries are kept oldest-first. When an append would exceed capacity the
/// oldest entries are evicted, never the newest.
#[derive(Debug)]
pub struct BoundedLog {
    entries: VecDeque<Arc<EventRecord>>,
    capacity: usize,
}

impl BoundedLog {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, event: Arc<EventRecord>) {
        self.entries.push_back(event);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Oldest-first copy of the current contents.
    pub fn all(&self) -> Vec<Arc<EventRecord>> {
        self.entries.iter().cloned().collect()
    }

    /// Newest-first copy, the order polling clients expect.
    pub fn newest_first(&self) -> Vec<Arc<EventRecord>> {
        self.entries.iter().rev().cloned().collect()
    }

    /// Oldest-first copy of every entry with `seq > after`.
    pub fn after(&self, after: u64) -> Vec<Arc<EventRecord>> {
        // Entries are sorted by seq, so skip from the back.
        let newer = self
            .entries
            .iter()
            .rev()
            .take_while(|e| e.seq > after)
            .count();
        self.entries
            .iter()
            .skip(self.entries.len() - newer)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for BoundedLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOGS)
    }
}
