//! SyncStrategy - When to fold waiting commands upstream.
//!
//! A script task tends to touch the same handful of objects over and over
//! (add a listener, remove it, add it again). Folding after every record
//! would defeat batching; never folding would starve the consumer.
//!
//! The strategy gives each object handle a dense index in first-seen order
//! and marks that index in a bitmap. Once every index the bitmap can hold is
//! marked, the producer has stopped discovering new objects for this tick,
//! so the next touch checkpoints: waiting is folded into reserve, all state
//! resets and `should_sync` is armed so the following record promotes.
//!
//! ```text
//!  handle -> frequency map -> index -> WaitingStatus bit
//!  0xA    ->                   0     -> bit 0 set
//!  0xB    ->                   1     -> bit 1 set
//!  0xA    ->                   0     -> (already set)
//! ```

use indexmap::IndexMap;
use relay_util::NativeHandle;

/// Default bitmap capacity, in distinct handles
pub const DEFAULT_SYNC_BUFFER_SIZE: usize = 64;

const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-capacity touched bitmap
///
/// A set bit means the object at that index has been recorded since the last
/// reset. Indices at or past the capacity are ignored.
#[derive(Debug, Clone)]
pub struct WaitingStatus {
    words: Vec<u64>,
    capacity: usize,
}

impl WaitingStatus {
    /// Create a bitmap able to track `capacity` handles
    pub fn new(capacity: usize) -> Self {
        let word_count = (capacity + WORD_BITS - 1) / WORD_BITS;
        Self {
            words: vec![0; word_count],
            capacity,
        }
    }

    /// Number of trackable indices
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mark `index` as touched
    pub fn set(&mut self, index: usize) {
        if index >= self.capacity {
            return;
        }
        self.words[index / WORD_BITS] |= 1u64 << (index % WORD_BITS);
    }

    /// Whether `index` has been touched
    pub fn is_set(&self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }
        self.words[index / WORD_BITS] & (1u64 << (index % WORD_BITS)) != 0
    }

    /// Number of touched indices
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether every trackable index is touched
    pub fn is_full(&self) -> bool {
        let full_words = self.capacity / WORD_BITS;
        if self.words[..full_words].iter().any(|&w| w != u64::MAX) {
            return false;
        }

        let tail_bits = self.capacity % WORD_BITS;
        if tail_bits == 0 {
            return true;
        }
        let tail_mask = (1u64 << tail_bits) - 1;
        self.words[full_words] & tail_mask == tail_mask
    }

    /// Clear every bit
    pub fn reset(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }
}

/// Outcome of touching a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchOutcome {
    /// Handle tracked, nothing to do
    Tracked,
    /// The working set was complete: fold waiting into reserve now.
    /// Strategy state has already been reset and `should_sync` is armed.
    Fold,
}

/// Per-pipeline batching heuristic
#[derive(Debug)]
pub struct SyncStrategy {
    frequency: IndexMap<u64, ()>,
    status: WaitingStatus,
    should_sync: bool,
}

impl SyncStrategy {
    /// Create a strategy whose bitmap tracks `capacity` distinct handles
    pub fn new(capacity: usize) -> Self {
        Self {
            frequency: IndexMap::new(),
            status: WaitingStatus::new(capacity),
            should_sync: false,
        }
    }

    /// Bitmap capacity in handles
    pub fn capacity(&self) -> usize {
        self.status.capacity()
    }

    /// Distinct handles seen since the last reset
    pub fn tracked(&self) -> usize {
        self.frequency.len()
    }

    /// Dense index assigned to `handle`, if tracked
    pub fn index_of(&self, handle: NativeHandle) -> Option<usize> {
        self.frequency.get_index_of(&handle.to_raw())
    }

    /// Touched bitmap
    pub fn status(&self) -> &WaitingStatus {
        &self.status
    }

    /// Whether the next record must promote reserve to active first
    #[inline]
    pub fn should_sync(&self) -> bool {
        self.should_sync
    }

    /// Record activity on `handle`
    pub fn touch(&mut self, handle: NativeHandle) -> TouchOutcome {
        if self.working_set_complete() {
            log::trace!(
                "SyncStrategy: working set of {} handles complete, folding",
                self.frequency.len()
            );
            self.reset();
            self.should_sync = true;
            return TouchOutcome::Fold;
        }

        let (index, _) = self.frequency.insert_full(handle.to_raw(), ());
        self.status.set(index);
        TouchOutcome::Tracked
    }

    /// Forget every handle and disarm `should_sync`
    pub fn reset(&mut self) {
        self.should_sync = false;
        self.status.reset();
        self.frequency.clear();
    }

    fn working_set_complete(&self) -> bool {
        self.frequency.len() >= self.status.capacity() && self.status.is_full()
    }
}

impl Default for SyncStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_SYNC_BUFFER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_util::HandleArena;

    fn handles(count: usize) -> Vec<NativeHandle> {
        let mut arena = HandleArena::new();
        (0..count).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn test_waiting_status_tail_word() {
        let mut status = WaitingStatus::new(70);
        for index in 0..69 {
            status.set(index);
        }
        assert!(!status.is_full());
        status.set(69);
        assert!(status.is_full());
        assert_eq!(status.count(), 70);

        // Past capacity is ignored
        status.set(70);
        assert!(!status.is_set(70));
        assert_eq!(status.count(), 70);
    }

    #[test]
    fn test_waiting_status_reset() {
        let mut status = WaitingStatus::new(64);
        (0..64).for_each(|i| status.set(i));
        assert!(status.is_full());
        status.reset();
        assert_eq!(status.count(), 0);
        assert!(!status.is_full());
    }

    #[test]
    fn test_indices_follow_first_seen_order() {
        let objects = handles(3);
        let mut strategy = SyncStrategy::new(8);
        strategy.touch(objects[1]);
        strategy.touch(objects[0]);
        strategy.touch(objects[1]);
        strategy.touch(objects[2]);

        assert_eq!(strategy.index_of(objects[1]), Some(0));
        assert_eq!(strategy.index_of(objects[0]), Some(1));
        assert_eq!(strategy.index_of(objects[2]), Some(2));
        assert_eq!(strategy.tracked(), 3);
        assert!(!strategy.should_sync());
    }

    #[test]
    fn test_complete_working_set_triggers_fold() {
        let objects = handles(5);
        let mut strategy = SyncStrategy::new(4);
        for &object in &objects[..4] {
            assert_eq!(strategy.touch(object), TouchOutcome::Tracked);
        }
        assert!(!strategy.should_sync());

        assert_eq!(strategy.touch(objects[4]), TouchOutcome::Fold);
        assert!(strategy.should_sync());
        assert_eq!(strategy.tracked(), 0);
        assert_eq!(strategy.status().count(), 0);
    }

    #[test]
    fn test_retouch_after_complete_set_triggers_fold() {
        let objects = handles(2);
        let mut strategy = SyncStrategy::new(2);
        strategy.touch(objects[0]);
        strategy.touch(objects[1]);
        assert_eq!(strategy.touch(objects[0]), TouchOutcome::Fold);
    }

    #[test]
    fn test_reset_disarms_sync() {
        let objects = handles(2);
        let mut strategy = SyncStrategy::new(1);
        strategy.touch(objects[0]);
        strategy.touch(objects[1]);
        assert!(strategy.should_sync());

        strategy.reset();
        assert!(!strategy.should_sync());
        assert_eq!(strategy.tracked(), 0);
    }
}
