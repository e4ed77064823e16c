//! # relay-core - Isolate Command Pipeline
//!
//! Records the commands an isolate (a script-engine instance with its own
//! thread and global state) emits for its host, and hands them to the host
//! in large batches with as little cross-thread synchronization as
//! possible.
//!
//! ## Overview
//!
//! - **CommandBuffer**: growable, contiguous sequence of fixed-size records
//! - **SyncStrategy**: decides when staged commands must become visible,
//!   from how many distinct objects were touched since the last publication
//! - **CommandPipeline**: `waiting → reserve → active` rotation; only the
//!   step into `active` is guarded by the visibility barrier
//! - **RuntimeRegistry**: per-thread runtimes and the thread-groups they
//!   serve, torn down when the last isolate goes
//! - **IsolateHost**: supervisor owning worker threads, registry and the
//!   consumer side of every pipeline
//!
//! ## Quick Start
//!
//! ```rust
//! use relay_core::{IsolateConfig, IsolateHost, RelayConfig, ThreadGroupId};
//!
//! fn main() -> relay_core::Result<()> {
//!     let mut host = IsolateHost::new(RelayConfig::default())?;
//!     let id = host.add_isolate(IsolateConfig::dedicated(ThreadGroupId::new(1)))?;
//!
//!     host.run_in_isolate(id, |isolate| {
//!         let context = isolate.context_mut();
//!         context.start_recording();
//!         context.finish_recording();
//!     })?;
//!
//!     let reader = host.reader(id)?;
//!     assert_eq!(reader.read_active().len(), 2);
//!     reader.clear_active();
//!
//!     host.remove_isolate(id)?;
//!     host.dispose()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────── isolate thread (single producer) ───────────────┐
//! │  record ──► waiting ──fold──► reserve ──promote──┐               │
//! │               ▲                                   │               │
//! │        SyncStrategy (distinct handles)            │               │
//! └───────────────────────────────────────────────────┼───────────────┘
//!                                          VisibilityBarrier
//! ┌──────────────── host thread (single consumer) ────┼───────────────┐
//! │  ActiveReader: swap active ◄──────────────────────┘               │
//! │                read / clear                                       │
//! └───────────────────────────────────────────────────────────────────┘
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod host;
pub mod isolate;
pub mod logging;
pub mod pipeline;
pub mod runtime;
pub mod stats;

pub use command::{
    CommandBuffer, CommandKind, CommandRecord, IsolateCommand, DEFAULT_COMMAND_CAPACITY,
};
pub use config::{ConfigError, IsolateConfig, RelayConfig};
pub use error::{RelayError, Result};
pub use host::{BatchUpdate, IsolateHost, Removal};
pub use isolate::{ExecutionContext, Isolate, IsolateId, ThreadGroupId};
pub use logging::{EventLog, EventLogConfig, LogLevel, RelayEvent};
pub use pipeline::{
    ActiveReader, ActiveSnapshot, BatchNotifier, CommandPipeline, PipelineOptions, SyncStrategy,
    VisibilityBarrier,
};
pub use runtime::{
    DetachOutcome, RuntimeContext, RuntimeId, RuntimeRegistry, TeardownReport, ThreadKey,
};
pub use stats::PipelineStats;

pub use relay_util::{NativeHandle, NativeString};
