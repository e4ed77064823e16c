//! Pipeline Module - Cross-Thread Command Handoff
//!
//! ============================================================================
//! BUFFER ROTATION
//! ============================================================================
//!
//! A dedicated pipeline owns three buffers:
//!
//! ```text
//!   record() ──► waiting ──fold──► reserve ──promote──► active ──► consumer
//!                (producer)        (producer)     │     (shared)
//!                                                 └─ under VisibilityBarrier
//! ```
//!
//! - **fold**: waiting into reserve. O(1) swap when reserve is empty, append
//!   otherwise. Triggered by the [`SyncStrategy`] heuristic and by every
//!   promotion.
//! - **promote**: fold, then append reserve onto active under the barrier,
//!   reset the strategy and ask the host for a consumption pass. Triggered by
//!   a finish marker, an armed `should_sync` or an explicit flush.
//!
//! A non-dedicated pipeline runs on the host's own thread, so it appends
//! straight to active and asks the host once per batch.
//!
//! Waiting, reserve and the strategy never leave the producer. The consumer
//! only reaches active, through the [`ActiveReader`] returned at
//! construction.

pub mod barrier;
pub mod strategy;

pub use barrier::{
    ActiveReader, ActiveSnapshot, BarrierGuard, VisibilityBarrier, DEFAULT_MAX_SPIN_ITERATIONS,
};
pub use strategy::{SyncStrategy, TouchOutcome, WaitingStatus, DEFAULT_SYNC_BUFFER_SIZE};

use std::sync::Arc;

use relay_util::{NativeHandle, NativeString};

use crate::command::{CommandBuffer, CommandRecord, IsolateCommand, DEFAULT_COMMAND_CAPACITY};
use crate::isolate::IsolateId;
use crate::stats::PipelineStats;
use barrier::SharedActive;

/// Host-side hook asking for a consumption pass
pub trait BatchNotifier: Send + Sync {
    /// New records are visible in `isolate`'s active buffer
    fn request_batch_update(&self, isolate: IsolateId, dedicated: bool);
}

/// Construction parameters for a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Run the three-stage rotation instead of appending straight to active
    pub dedicated: bool,
    /// SyncStrategy bitmap capacity, in handles
    pub sync_buffer_size: usize,
    /// Starting capacity of every buffer
    pub initial_capacity: usize,
    /// Barrier spins before yielding
    pub max_spin_iterations: usize,
}

impl PipelineOptions {
    /// Default options for a dedicated pipeline
    pub fn dedicated() -> Self {
        Self {
            dedicated: true,
            ..Self::default()
        }
    }

    /// Default options for a non-dedicated pipeline
    pub fn shared() -> Self {
        Self::default()
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            dedicated: false,
            sync_buffer_size: DEFAULT_SYNC_BUFFER_SIZE,
            initial_capacity: DEFAULT_COMMAND_CAPACITY,
            max_spin_iterations: DEFAULT_MAX_SPIN_ITERATIONS,
        }
    }
}

/// Producer side of one isolate's command handoff
pub struct CommandPipeline {
    isolate: IsolateId,
    dedicated: bool,
    valid: bool,
    shared: Arc<SharedActive>,
    reserve: CommandBuffer,
    waiting: CommandBuffer,
    strategy: SyncStrategy,
    notifier: Option<Arc<dyn BatchNotifier>>,
    stats: PipelineStats,
}

impl CommandPipeline {
    /// Create a pipeline and the reader the consumer drains it with
    pub fn new(
        isolate: IsolateId,
        options: PipelineOptions,
        notifier: Option<Arc<dyn BatchNotifier>>,
    ) -> (Self, ActiveReader) {
        let capacity = options.initial_capacity;
        let shared = Arc::new(SharedActive::new(capacity, options.max_spin_iterations));
        let reader = ActiveReader::new(Arc::clone(&shared), capacity);

        // Reserve and waiting stay empty in non-dedicated mode.
        let stage_capacity = if options.dedicated { capacity } else { 0 };

        let pipeline = Self {
            isolate,
            dedicated: options.dedicated,
            valid: true,
            shared,
            reserve: CommandBuffer::with_capacity(stage_capacity),
            waiting: CommandBuffer::with_capacity(stage_capacity),
            strategy: SyncStrategy::new(options.sync_buffer_size),
            notifier,
            stats: PipelineStats::default(),
        };
        (pipeline, reader)
    }

    /// Record one command
    ///
    /// Payload ownership moves into the record. On an invalidated pipeline
    /// the command is dropped and the payload released.
    pub fn record(
        &mut self,
        command: IsolateCommand,
        payload: Option<NativeString>,
        handle1: Option<NativeHandle>,
        handle2: Option<NativeHandle>,
    ) {
        if !self.valid {
            log::trace!(
                "Isolate {}: dropping {:?} on invalid context",
                self.isolate,
                command
            );
            self.stats.dropped += 1;
            return;
        }

        let record = CommandRecord::new(command, payload, handle1, handle2);
        self.stats.recorded += 1;

        if !self.dedicated {
            self.record_shared(record);
            return;
        }

        if self.strategy.should_sync() {
            self.promote_reserve_to_active();
        }

        self.waiting.append(record);

        if let Some(handle) = handle1 {
            if self.strategy.touch(handle) == TouchOutcome::Fold {
                self.fold_waiting_into_reserve();
            }
        }

        if command.is_finish_marker() {
            self.promote_reserve_to_active();
        }
    }

    fn record_shared(&mut self, record: CommandRecord) {
        let first_of_batch = self.shared.with_state(|state| {
            state.buffer.append(record);
            !std::mem::replace(&mut state.batch_requested, true)
        });
        if first_of_batch {
            self.notify();
        }
    }

    /// Merge waiting into reserve
    ///
    /// No-op when waiting is empty. Swaps the two buffers when reserve is
    /// empty, appends otherwise; either way waiting ends up empty.
    pub fn fold_waiting_into_reserve(&mut self) {
        if self.waiting.is_empty() {
            return;
        }

        if self.reserve.is_empty() {
            std::mem::swap(&mut self.reserve, &mut self.waiting);
            self.stats.swap_folds += 1;
        } else {
            self.reserve.append_from(&mut self.waiting);
            self.stats.append_folds += 1;
        }

        log::trace!(
            "Isolate {}: folded into reserve ({} records)",
            self.isolate,
            self.reserve.len()
        );
        debug_assert!(self.waiting.is_empty());
    }

    /// Make everything recorded so far visible to the consumer
    pub fn promote_reserve_to_active(&mut self) {
        self.fold_waiting_into_reserve();
        if self.reserve.is_empty() {
            return;
        }

        self.strategy.reset();

        let moved = self.reserve.len();
        let reserve = &mut self.reserve;
        self.shared.with_state(|state| state.buffer.append_from(reserve));

        self.stats.promotions += 1;
        self.stats.promoted_records += moved as u64;
        log::debug!(
            "Isolate {}: promoted {} records to active",
            self.isolate,
            moved
        );

        self.notify();
    }

    /// Promote pending records, e.g. at the end of a script task
    pub fn flush(&mut self) {
        if self.dedicated {
            self.promote_reserve_to_active();
        }
    }

    /// Whether nothing is pending on the producer side
    ///
    /// Dedicated: waiting and reserve are empty. Non-dedicated: active is
    /// empty.
    pub fn is_empty(&self) -> bool {
        if self.dedicated {
            return self.reserve.is_empty() && self.waiting.is_empty();
        }
        self.shared.with_state(|state| state.buffer.is_empty())
    }

    /// Stop accepting records
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Whether records are accepted
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Owning isolate
    pub fn isolate(&self) -> IsolateId {
        self.isolate
    }

    /// Whether the three-stage rotation is in use
    pub fn is_dedicated(&self) -> bool {
        self.dedicated
    }

    /// Producer counters
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Batching heuristic state
    pub fn strategy(&self) -> &SyncStrategy {
        &self.strategy
    }

    /// Producer accumulation stage
    pub fn waiting(&self) -> &CommandBuffer {
        &self.waiting
    }

    /// Merged stage awaiting promotion
    pub fn reserve(&self) -> &CommandBuffer {
        &self.reserve
    }

    fn notify(&mut self) {
        self.stats.batch_requests += 1;
        if let Some(notifier) = &self.notifier {
            notifier.request_batch_update(self.isolate, self.dedicated);
        }
    }
}

impl Drop for CommandPipeline {
    fn drop(&mut self) {
        // Never published: payloads still belong to the producer.
        let mut released = 0usize;
        for buffer in [&mut self.waiting, &mut self.reserve] {
            for record in buffer.data() {
                // SAFETY: unpublished records are owned solely by this pipeline.
                if unsafe { record.take_payload() }.is_some() {
                    released += 1;
                }
            }
            buffer.clear();
        }
        if released > 0 {
            log::debug!(
                "Isolate {}: released {} unpublished payloads",
                self.isolate,
                released
            );
        }
    }
}

impl std::fmt::Debug for CommandPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPipeline")
            .field("isolate", &self.isolate)
            .field("dedicated", &self.dedicated)
            .field("valid", &self.valid)
            .field("waiting", &self.waiting.len())
            .field("reserve", &self.reserve.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use parking_lot::Mutex;
    use relay_util::HandleArena;

    #[derive(Default)]
    struct RecordingNotifier {
        requests: Mutex<Vec<(IsolateId, bool)>>,
    }

    impl BatchNotifier for RecordingNotifier {
        fn request_batch_update(&self, isolate: IsolateId, dedicated: bool) {
            self.requests.lock().push((isolate, dedicated));
        }
    }

    fn options(dedicated: bool, sync_buffer_size: usize) -> PipelineOptions {
        PipelineOptions {
            dedicated,
            sync_buffer_size,
            initial_capacity: 4,
            max_spin_iterations: 16,
        }
    }

    #[test]
    fn test_dedicated_records_land_in_waiting() {
        let (mut pipeline, mut reader) =
            CommandPipeline::new(IsolateId::new(1), options(true, 8), None);
        pipeline.record(IsolateCommand::CreateGlobal, None, None, None);

        assert_eq!(pipeline.waiting().len(), 1);
        assert!(pipeline.reserve().is_empty());
        assert_eq!(reader.read_active().len(), 0);
        assert!(!pipeline.is_empty());
    }

    #[test]
    fn test_fold_swaps_when_reserve_empty() {
        let (mut pipeline, _reader) =
            CommandPipeline::new(IsolateId::new(1), options(true, 8), None);
        pipeline.record(IsolateCommand::CreateGlobal, None, None, None);
        pipeline.record(IsolateCommand::CreateEventTarget, None, None, None);
        let before = pipeline.waiting().as_ptr();
        let before_records = pipeline.waiting().data().to_vec();

        pipeline.fold_waiting_into_reserve();

        assert!(pipeline.waiting().is_empty());
        assert_eq!(pipeline.reserve().as_ptr(), before);
        assert_eq!(pipeline.reserve().data(), &before_records[..]);
        assert_eq!(pipeline.stats().swap_folds, 1);
    }

    #[test]
    fn test_fold_appends_when_reserve_occupied() {
        let (mut pipeline, _reader) =
            CommandPipeline::new(IsolateId::new(1), options(true, 8), None);
        pipeline.record(IsolateCommand::CreateGlobal, None, None, None);
        pipeline.fold_waiting_into_reserve();
        pipeline.record(IsolateCommand::CreateEventTarget, None, None, None);
        pipeline.fold_waiting_into_reserve();

        let kinds: Vec<_> = pipeline.reserve().data().iter().map(|r| r.command()).collect();
        assert_eq!(
            kinds,
            vec![
                Some(IsolateCommand::CreateGlobal),
                Some(IsolateCommand::CreateEventTarget)
            ]
        );
        assert_eq!(pipeline.stats().append_folds, 1);
    }

    #[test]
    fn test_fold_of_empty_waiting_is_noop() {
        let (mut pipeline, _reader) =
            CommandPipeline::new(IsolateId::new(1), options(true, 8), None);
        pipeline.fold_waiting_into_reserve();
        assert_eq!(pipeline.stats().folds(), 0);
    }

    #[test]
    fn test_finish_marker_promotes_and_notifies() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (mut pipeline, mut reader) = CommandPipeline::new(
            IsolateId::new(3),
            options(true, 8),
            Some(notifier.clone() as Arc<dyn BatchNotifier>),
        );
        pipeline.record(IsolateCommand::StartRecording, None, None, None);
        pipeline.record(IsolateCommand::FinishRecording, None, None, None);

        assert!(pipeline.is_empty());
        let batch = reader.read_active();
        assert_eq!(batch.len(), 2);
        assert!(batch.kind_mask().contains(CommandKind::RECORDING));
        assert_eq!(*notifier.requests.lock(), vec![(IsolateId::new(3), true)]);
    }

    #[test]
    fn test_promote_of_nothing_does_not_notify() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (mut pipeline, _reader) = CommandPipeline::new(
            IsolateId::new(3),
            options(true, 8),
            Some(notifier.clone() as Arc<dyn BatchNotifier>),
        );
        pipeline.flush();
        assert!(notifier.requests.lock().is_empty());
        assert_eq!(pipeline.stats().promotions, 0);
    }

    #[test]
    fn test_strategy_fold_then_promote_on_next_record() {
        let mut arena = HandleArena::new();
        let objects: Vec<_> = (0..3).map(|_| arena.insert(())).collect();
        let (mut pipeline, mut reader) =
            CommandPipeline::new(IsolateId::new(1), options(true, 2), None);

        pipeline.record(IsolateCommand::AddEvent, None, Some(objects[0]), None);
        pipeline.record(IsolateCommand::AddEvent, None, Some(objects[1]), None);
        assert_eq!(pipeline.waiting().len(), 2);

        // Working set complete: this touch folds everything into reserve.
        pipeline.record(IsolateCommand::AddEvent, None, Some(objects[2]), None);
        assert!(pipeline.waiting().is_empty());
        assert_eq!(pipeline.reserve().len(), 3);
        assert!(pipeline.strategy().should_sync());
        assert_eq!(reader.read_active().len(), 0);

        // Armed: the next record promotes the reserve first.
        pipeline.record(IsolateCommand::RemoveEvent, None, Some(objects[0]), None);
        assert_eq!(reader.read_active().len(), 3);
        assert_eq!(pipeline.waiting().len(), 1);
        assert!(!pipeline.strategy().should_sync());
    }

    #[test]
    fn test_non_dedicated_requests_once_per_batch() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (mut pipeline, mut reader) = CommandPipeline::new(
            IsolateId::new(9),
            options(false, 8),
            Some(notifier.clone() as Arc<dyn BatchNotifier>),
        );
        for _ in 0..3 {
            pipeline.record(IsolateCommand::CreateEventTarget, None, None, None);
        }
        assert_eq!(notifier.requests.lock().len(), 1);
        assert!(!pipeline.is_empty());

        assert_eq!(reader.read_active().len(), 3);
        reader.clear_active();
        pipeline.record(IsolateCommand::CreateEventTarget, None, None, None);
        assert_eq!(
            *notifier.requests.lock(),
            vec![(IsolateId::new(9), false), (IsolateId::new(9), false)]
        );
    }

    #[test]
    fn test_invalid_pipeline_drops_records() {
        let (mut pipeline, mut reader) =
            CommandPipeline::new(IsolateId::new(1), options(false, 8), None);
        pipeline.invalidate();
        let payload = NativeString::new("click").unwrap();
        pipeline.record(IsolateCommand::AddEvent, Some(payload), None, None);

        assert_eq!(reader.read_active().len(), 0);
        assert_eq!(pipeline.stats().dropped, 1);
        assert_eq!(pipeline.stats().recorded, 0);
    }
}
