use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU (Least Recently Used) page replacement policy.
///
/// Holds exactly the frames that are resident and unpinned. The ordered map
/// keeps insertion order, so the front is the oldest unpinned frame and the
/// back is the most recently unpinned one.
pub struct LRUReplacer {
    inner: Mutex<LruInner>,
}

struct LruInner {
    lru_map: LinkedHashMap<FrameId, ()>,
    capacity: usize,
}

impl LRUReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                lru_map: LinkedHashMap::with_capacity(pool_size),
                capacity: pool_size,
            }),
        }
    }

    /// Remove and return the least recently unpinned frame
    pub fn victim(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        inner.lru_map.pop_front().map(|(frame_id, ())| frame_id)
    }

    /// Drop a frame from the victim candidates; no-op if absent
    pub fn pin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        inner.lru_map.remove(&frame_id);
    }

    /// Register a frame as a victim candidate at the MRU end.
    ///
    /// Idempotent: a frame already registered keeps its position. Cannot
    /// overflow when callers respect the pin discipline, but if it would,
    /// the oldest entry is dropped.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if inner.lru_map.contains_key(&frame_id) {
            return;
        }
        while inner.lru_map.len() >= inner.capacity {
            inner.lru_map.pop_front();
        }
        inner.lru_map.insert(frame_id, ());
    }

    /// Number of victim candidates
    pub fn size(&self) -> usize {
        self.inner.lock().len()
    }
}

impl LruInner {
    fn len(&self) -> usize {
        self.lru_map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_victim_order_is_lru() {
        let replacer = LRUReplacer::new(7);

        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_pin_removes_candidate() {
        let replacer = LRUReplacer::new(3);

        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);
        replacer.victim();
        replacer.victim();
        replacer.pin(3);
        assert_eq!(replacer.victim(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_unpin_is_idempotent() {
        let replacer = LRUReplacer::new(3);

        replacer.unpin(5);
        replacer.unpin(6);
        replacer.unpin(5);
        assert_eq!(replacer.size(), 2);
        // 5 keeps its original (oldest) position
        assert_eq!(replacer.victim(), Some(5));
        assert_eq!(replacer.victim(), Some(6));
    }

    #[test]
    fn test_capacity_overflow_drops_oldest() {
        let replacer = LRUReplacer::new(2);

        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);
        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
    }
}
