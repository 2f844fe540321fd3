//! Pending track queue
//!
//! Strict FIFO of tracks awaiting playback. The head is the speculative
//! prefetch target; dequeue happens only when a track is promoted to current
//! playback, so the queue always reflects what has not started yet.

use crate::track::TrackDescriptor;
use std::collections::VecDeque;

/// FIFO of pending tracks.
#[derive(Debug, Default)]
pub struct TrackQueue {
    tracks: VecDeque<TrackDescriptor>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a track at the tail.
    pub fn enqueue(&mut self, track: TrackDescriptor) {
        self.tracks.push_back(track);
    }

    /// Remove and return the head, if any.
    pub fn dequeue_front(&mut self) -> Option<TrackDescriptor> {
        self.tracks.pop_front()
    }

    /// The current head, if any. This is the next track to play and the
    /// speculative prefetch target.
    pub fn head(&self) -> Option<&TrackDescriptor> {
        self.tracks.front()
    }

    /// Remove the track at `index`, preserving the order of the rest.
    pub fn remove_at(&mut self, index: usize) -> Option<TrackDescriptor> {
        self.tracks.remove(index)
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(link: &str) -> TrackDescriptor {
        TrackDescriptor::from_link(link)
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = TrackQueue::new();
        queue.enqueue(track("a"));
        queue.enqueue(track("b"));
        queue.enqueue(track("c"));

        assert_eq!(queue.head().unwrap().link, "a");
        assert_eq!(queue.dequeue_front().unwrap().link, "a");
        assert_eq!(queue.dequeue_front().unwrap().link, "b");
        assert_eq!(queue.dequeue_front().unwrap().link, "c");
        assert!(queue.dequeue_front().is_none());
    }

    #[test]
    fn test_remove_at_preserves_order() {
        let mut queue = TrackQueue::new();
        queue.enqueue(track("a"));
        queue.enqueue(track("b"));
        queue.enqueue(track("c"));

        let removed = queue.remove_at(1).unwrap();
        assert_eq!(removed.link, "b");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue_front().unwrap().link, "a");
        assert_eq!(queue.dequeue_front().unwrap().link, "c");
    }

    #[test]
    fn test_remove_at_out_of_range() {
        let mut queue = TrackQueue::new();
        queue.enqueue(track("a"));
        assert!(queue.remove_at(3).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut queue = TrackQueue::new();
        queue.enqueue(track("a"));
        queue.enqueue(track("b"));
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.head().is_none());
    }
}
