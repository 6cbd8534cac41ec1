//! Ordering buffer for connectivity candidates.

use std::collections::VecDeque;

/// Holds candidates until their consumer is ready for them.
///
/// The queue never filters or deduplicates; it only guarantees that items
/// leave in the order they arrived.
#[derive(Debug, Clone)]
pub struct CandidateQueue<T> {
    pending: VecDeque<T>,
}

impl<T> Default for CandidateQueue<T> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }
}

impl<T> CandidateQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, candidate: T) {
        self.pending.push_back(candidate);
    }

    /// Hands back everything queued, oldest first, once `ready` is true.
    /// Returns nothing and keeps the queue intact otherwise.
    pub fn drain_if_ready(&mut self, ready: bool) -> Vec<T> {
        if !ready {
            return Vec::new();
        }
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_preserves_arrival_order() {
        let mut queue = CandidateQueue::new();
        queue.enqueue("c1");
        queue.enqueue("c2");
        queue.enqueue("c3");

        assert_eq!(queue.drain_if_ready(true), vec!["c1", "c2", "c3"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_not_ready_keeps_candidates() {
        let mut queue = CandidateQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);

        assert!(queue.drain_if_ready(false).is_empty());
        assert_eq!(queue.len(), 2);

        queue.enqueue(3);
        assert_eq!(queue.drain_if_ready(true), vec![1, 2, 3]);
        assert!(queue.drain_if_ready(true).is_empty());
    }

    #[test]
    fn test_duplicates_are_not_filtered() {
        let mut queue = CandidateQueue::new();
        queue.enqueue("same");
        queue.enqueue("same");
        assert_eq!(queue.drain_if_ready(true).len(), 2);
    }

    #[test]
    fn test_clear_discards_pending() {
        let mut queue = CandidateQueue::new();
        queue.enqueue("c1");
        queue.clear();
        assert!(queue.drain_if_ready(true).is_empty());
    }
}
