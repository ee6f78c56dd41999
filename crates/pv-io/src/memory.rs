//! In-memory event source.

use pv_core::{EventRecord, EventSource, Result};

/// Serves a vector of records in fixed-size batches.
#[derive(Debug, Clone)]
pub struct MemoryEventSource {
    events: Vec<EventRecord>,
    pos: usize,
    batch_size: usize,
}

impl MemoryEventSource {
    /// Serve `events` as a single batch.
    pub fn new(events: Vec<EventRecord>) -> Self {
        let batch_size = events.len().max(1);
        Self { events, pos: 0, batch_size }
    }

    /// Split into batches of `n` records (minimum 1).
    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }
}

impl EventSource for MemoryEventSource {
    fn next_batch(&mut self) -> Result<Option<Vec<EventRecord>>> {
        if self.pos >= self.events.len() {
            return Ok(None);
        }
        let end = (self.pos + self.batch_size).min(self.events.len());
        let batch = self.events[self.pos..end].to_vec();
        self.pos = end;
        Ok(Some(batch))
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.events.len())
    }

    fn describe(&self) -> String {
        format!("memory ({} events)", self.events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batches() {
        let events: Vec<EventRecord> =
            (0..5).map(|i| EventRecord::new(1, 4 + i, 0, vec![1.0])).collect();
        let mut src = MemoryEventSource::new(events.clone()).with_batch_size(2);
        let mut sizes = Vec::new();
        let mut all = Vec::new();
        while let Some(b) = src.next_batch().unwrap() {
            sizes.push(b.len());
            all.extend(b);
        }
        assert_eq!(sizes, [2, 2, 1]);
        assert_eq!(all, events);
        assert_eq!(src.len_hint(), Some(5));
    }

    #[test]
    fn test_empty() {
        let mut src = MemoryEventSource::new(Vec::new());
        assert!(src.next_batch().unwrap().is_none());
    }
}
