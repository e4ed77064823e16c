//! Visibility barrier around the active buffer.
//!
//! The active buffer is the only structure both the producer and the
//! consumer touch. Access goes through a single atomic flag taken with
//! acquire ordering and released with release ordering:
//!
//! ```text
//!  producer                         consumer
//!  --------                         --------
//!  barrier.acquire()                barrier.acquire()
//!  active.append_from(reserve)      swap(active, local)     O(1)
//!  barrier.release()                barrier.release()
//!                                   read local freely
//! ```
//!
//! Neither side ever holds the flag for longer than a pointer swap or one
//! bulk append, so contention resolves with a short spin. After
//! `max_spin_iterations` failed attempts the waiter yields its time slice.
//!
//! The consumer never dereferences the shared buffer outside the barrier:
//! it swaps the whole buffer into an [`ActiveReader`]-local one and reads
//! that, so a promotion can proceed while the host is still processing the
//! previous batch.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::command::{CommandBuffer, CommandKind, CommandRecord};

/// Default number of spins before a waiter starts yielding
pub const DEFAULT_MAX_SPIN_ITERATIONS: usize = 1024;

/// Spin flag guarding the active buffer
#[derive(Debug)]
pub struct VisibilityBarrier {
    blocked: AtomicBool,
    max_spin_iterations: usize,
}

impl VisibilityBarrier {
    /// Create an open barrier
    pub fn new(max_spin_iterations: usize) -> Self {
        Self {
            blocked: AtomicBool::new(false),
            max_spin_iterations,
        }
    }

    /// Whether a critical section is in progress
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    /// Try to close the barrier without waiting
    pub fn try_acquire(&self) -> Option<BarrierGuard<'_>> {
        self.blocked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| BarrierGuard { barrier: self })
    }

    /// Close the barrier, spinning while the other side holds it
    pub fn acquire(&self) -> BarrierGuard<'_> {
        let mut spins = 0usize;
        loop {
            if let Some(guard) = self.try_acquire() {
                return guard;
            }

            // Spin on a plain load so the cache line stays shared.
            while self.blocked.load(Ordering::Relaxed) {
                if spins < self.max_spin_iterations {
                    spins += 1;
                    std::hint::spin_loop();
                } else {
                    std::thread::yield_now();
                }
            }
        }
    }
}

impl Default for VisibilityBarrier {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SPIN_ITERATIONS)
    }
}

/// Open barrier on drop
#[derive(Debug)]
pub struct BarrierGuard<'a> {
    barrier: &'a VisibilityBarrier,
}

impl Drop for BarrierGuard<'_> {
    fn drop(&mut self) {
        self.barrier.blocked.store(false, Ordering::Release);
    }
}

/// State behind the barrier
#[derive(Debug)]
pub(crate) struct ActiveState {
    pub(crate) buffer: CommandBuffer,
    /// Non-dedicated pipelines ask the host once per batch; reset whenever
    /// the consumer takes the batch.
    pub(crate) batch_requested: bool,
}

/// The active buffer shared between one producer and one consumer
#[derive(Debug)]
pub(crate) struct SharedActive {
    barrier: VisibilityBarrier,
    state: UnsafeCell<ActiveState>,
}

// SAFETY: `state` is only reached through `with_state`, which holds the
// barrier for the whole access.
unsafe impl Sync for SharedActive {}

impl SharedActive {
    pub(crate) fn new(capacity: usize, max_spin_iterations: usize) -> Self {
        Self {
            barrier: VisibilityBarrier::new(max_spin_iterations),
            state: UnsafeCell::new(ActiveState {
                buffer: CommandBuffer::with_capacity(capacity),
                batch_requested: false,
            }),
        }
    }

    pub(crate) fn barrier(&self) -> &VisibilityBarrier {
        &self.barrier
    }

    /// Run `f` with exclusive access to the active state
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ActiveState) -> R) -> R {
        let _guard = self.barrier.acquire();
        // SAFETY: the barrier is held; no other reference to `state` exists.
        let state = unsafe { &mut *self.state.get() };
        f(state)
    }
}

/// Consumer view of one batch
#[derive(Debug, Clone, Copy)]
pub struct ActiveSnapshot<'a> {
    records: &'a [CommandRecord],
    kind_mask: CommandKind,
}

impl<'a> ActiveSnapshot<'a> {
    /// Records in production order
    pub fn records(&self) -> &'a [CommandRecord] {
        self.records
    }

    /// Start of the record array
    pub fn as_ptr(&self) -> *const CommandRecord {
        self.records.as_ptr()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the batch is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Categories present in the batch
    pub fn kind_mask(&self) -> CommandKind {
        self.kind_mask
    }
}

/// Consumer handle for one pipeline's active buffer
///
/// Exactly one reader exists per pipeline. It is `Send`, so the host can
/// keep it on whichever thread drains commands.
#[derive(Debug)]
pub struct ActiveReader {
    shared: Arc<SharedActive>,
    consumed: CommandBuffer,
}

impl ActiveReader {
    pub(crate) fn new(shared: Arc<SharedActive>, capacity: usize) -> Self {
        Self {
            shared,
            consumed: CommandBuffer::with_capacity(capacity),
        }
    }

    /// Current batch
    ///
    /// While the previous batch is unacknowledged, it is returned again.
    /// Otherwise whatever is active is taken under the barrier with one
    /// buffer swap.
    pub fn read_active(&mut self) -> ActiveSnapshot<'_> {
        self.refresh();
        ActiveSnapshot {
            records: self.consumed.data(),
            kind_mask: self.consumed.kind_mask(),
        }
    }

    /// Pointer to the current batch's records
    ///
    /// Takes a new batch like [`read_active`](Self::read_active). Call it
    /// before [`kind_mask`](Self::kind_mask) and [`size`](Self::size); those
    /// two describe the batch this pointer refers to.
    pub fn data(&mut self) -> *const CommandRecord {
        self.refresh();
        self.consumed.as_ptr()
    }

    /// Categories of the batch already held; never takes a new one
    pub fn kind_mask(&self) -> CommandKind {
        self.consumed.kind_mask()
    }

    /// Size of the batch already held; never takes a new one
    pub fn size(&self) -> usize {
        self.consumed.len()
    }

    /// Acknowledge the current batch
    ///
    /// Idempotent. Payloads still referenced by the records are the
    /// consumer's to release before calling this.
    pub fn clear_active(&mut self) {
        self.consumed.clear();
    }

    /// Drop everything still waiting in active, releasing its payloads
    ///
    /// Only records this reader never handed out are touched; the current
    /// batch stays the consumer's. Returns the number of payloads released.
    pub fn release_unread(&mut self) -> usize {
        self.shared.with_state(|state| {
            let released = state
                .buffer
                .data()
                .iter()
                // SAFETY: records still in active never reached the consumer.
                .filter_map(|record| unsafe { record.take_payload() })
                .count();
            state.buffer.clear();
            released
        })
    }

    fn refresh(&mut self) {
        if !self.consumed.is_empty() {
            return;
        }
        let consumed = &mut self.consumed;
        self.shared.with_state(|state| {
            if state.buffer.is_empty() {
                return;
            }
            std::mem::swap(&mut state.buffer, consumed);
            state.batch_requested = false;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::IsolateCommand;

    fn shared() -> Arc<SharedActive> {
        Arc::new(SharedActive::new(8, 16))
    }

    fn push(shared: &SharedActive, tag: i64) {
        shared.with_state(|state| {
            state.buffer.append(CommandRecord {
                kind: IsolateCommand::AddEvent.code(),
                native_ptr_2: tag,
                ..CommandRecord::default()
            })
        });
    }

    #[test]
    fn test_guard_releases_barrier() {
        let barrier = VisibilityBarrier::default();
        {
            let _guard = barrier.acquire();
            assert!(barrier.is_blocked());
            assert!(barrier.try_acquire().is_none());
        }
        assert!(!barrier.is_blocked());
        assert!(barrier.try_acquire().is_some());
    }

    #[test]
    fn test_reader_takes_batch_by_swap() {
        let shared = shared();
        let mut reader = ActiveReader::new(Arc::clone(&shared), 8);
        push(&shared, 1);
        push(&shared, 2);
        let active_ptr = shared.with_state(|state| state.buffer.as_ptr());

        let snapshot = reader.read_active();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.as_ptr(), active_ptr);
        assert!(shared.with_state(|state| state.buffer.is_empty()));
    }

    #[test]
    fn test_unacknowledged_batch_is_stable() {
        let shared = shared();
        let mut reader = ActiveReader::new(Arc::clone(&shared), 8);
        push(&shared, 1);
        assert_eq!(reader.read_active().len(), 1);

        push(&shared, 2);
        assert_eq!(reader.read_active().len(), 1);

        reader.clear_active();
        assert_eq!(reader.read_active().len(), 1);
        assert_eq!(reader.read_active().records()[0].native_ptr_2, 2);
    }

    #[test]
    fn test_size_describes_batch_behind_data() {
        let shared = shared();
        let mut reader = ActiveReader::new(Arc::clone(&shared), 8);

        // Nothing published: the reader keeps its own buffer.
        let before = reader.data();
        push(&shared, 1);
        assert_eq!(reader.size(), 0);
        assert!(reader.kind_mask().is_empty());
        assert_ne!(before, shared.with_state(|state| state.buffer.as_ptr()));

        let taken = reader.data();
        assert_eq!(reader.size(), 1);
        push(&shared, 2);
        assert_eq!(reader.size(), 1);
        assert_eq!(reader.read_active().as_ptr(), taken);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let shared = shared();
        let mut reader = ActiveReader::new(shared, 8);
        reader.clear_active();
        reader.clear_active();
        assert!(reader.read_active().is_empty());
        assert!(reader.read_active().kind_mask().is_empty());
    }

    #[test]
    fn test_release_unread_keeps_current_batch() {
        let shared = shared();
        let mut reader = ActiveReader::new(Arc::clone(&shared), 8);
        push(&shared, 1);
        assert_eq!(reader.read_active().len(), 1);

        let payload = relay_util::NativeString::new("late").unwrap();
        shared.with_state(|state| {
            state.buffer.append(CommandRecord::new(
                IsolateCommand::AddEvent,
                Some(payload),
                None,
                None,
            ))
        });

        assert_eq!(reader.release_unread(), 1);
        assert!(shared.with_state(|state| state.buffer.is_empty()));
        assert_eq!(reader.read_active().len(), 1);
        assert_eq!(reader.release_unread(), 0);
    }

    #[test]
    fn test_barrier_excludes_concurrent_access() {
        let barrier = Arc::new(VisibilityBarrier::new(4));
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let _guard = barrier.acquire();
                        // Non-atomic read-modify-write under the barrier.
                        let value = counter.load(Ordering::Relaxed);
                        counter.store(value + 1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 4000);
    }
}
