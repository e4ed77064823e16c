//! Shared fixtures for the relay-core integration tests
//!
//! ============================================================================
//! Every fixture records through the public API only; what a test sees is
//! what a host would see.
//! ============================================================================

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use relay_core::pipeline::{ActiveReader, BatchNotifier, CommandPipeline, PipelineOptions};
use relay_core::{CommandRecord, IsolateHost, IsolateId, RelayConfig};
use relay_util::{HandleArena, NativeHandle};

/// Small buffers so growth paths run in every test
pub const TEST_CAPACITY: usize = 8;

/// Spin budget that keeps contended tests yielding early
pub const TEST_SPINS: usize = 16;

/// ============================================================================
/// PIPELINE FIXTURE
/// ============================================================================

/// Notifier that remembers every request
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub requests: Mutex<Vec<(IsolateId, bool)>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl BatchNotifier for RecordingNotifier {
    fn request_batch_update(&self, isolate: IsolateId, dedicated: bool) {
        self.requests.lock().push((isolate, dedicated));
    }
}

pub fn options(dedicated: bool, sync_buffer_size: usize) -> PipelineOptions {
    PipelineOptions {
        dedicated,
        sync_buffer_size,
        initial_capacity: TEST_CAPACITY,
        max_spin_iterations: TEST_SPINS,
    }
}

/// Pipeline for isolate 1 with a recording notifier
pub fn pipeline(
    dedicated: bool,
    sync_buffer_size: usize,
) -> (CommandPipeline, ActiveReader, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let hook: Arc<dyn BatchNotifier> = notifier.clone();
    let (pipeline, reader) = CommandPipeline::new(
        IsolateId::new(1),
        options(dedicated, sync_buffer_size),
        Some(hook),
    );
    (pipeline, reader, notifier)
}

/// Arena plus `count` distinct live handles
pub fn handles(count: usize) -> (HandleArena<()>, Vec<NativeHandle>) {
    let mut arena = HandleArena::new();
    let handles = (0..count).map(|_| arena.insert(())).collect();
    (arena, handles)
}

/// Take the current batch and acknowledge it
pub fn drain(reader: &mut ActiveReader) -> Vec<CommandRecord> {
    let records = reader.read_active().records().to_vec();
    reader.clear_active();
    records
}

/// Release every payload in `records`
///
/// Each record must come from a batch the test consumed exactly once.
pub fn release_payloads(records: &[CommandRecord]) -> usize {
    records
        .iter()
        // SAFETY: callers hand over records they consumed and nobody else reads.
        .filter_map(|record| unsafe { record.take_payload() })
        .count()
}

/// ============================================================================
/// HOST FIXTURE
/// ============================================================================

pub fn host_config() -> RelayConfig {
    RelayConfig {
        initial_command_capacity: TEST_CAPACITY,
        max_spin_iterations: TEST_SPINS,
        worker_thread_prefix: "relay-test".to_string(),
        ..RelayConfig::default()
    }
}

pub fn host() -> IsolateHost {
    IsolateHost::new(host_config()).expect("test config should be valid")
}
