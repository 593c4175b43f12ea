//! In-memory ring buffer of recently handled events, exposed on GET /events
//! for test assertions and manual inspection.

use std::collections::VecDeque;

pub struct EventLog {
    entries: VecDeque<serde_json::Value>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: serde_json::Value) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Most recent `limit` entries, oldest first.
    pub fn tail(&self, limit: usize) -> Vec<serde_json::Value> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
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

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut log = EventLog::new(3);
        for i in 0..5 {
            log.push(serde_json::json!({"n": i}));
        }
        assert_eq!(log.len(), 3);
        let tail = log.tail(10);
        assert_eq!(tail[0]["n"], 2);
        assert_eq!(tail[2]["n"], 4);
    }

    #[test]
    fn test_tail_limits_output() {
        let mut log = EventLog::new(10);
        for i in 0..6 {
            log.push(serde_json::json!({"n": i}));
        }
        let tail = log.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0]["n"], 4);
        assert_eq!(tail[1]["n"], 5);
    }
}
