//! Error Module - Relay Error Types
//!
//! The command pipeline itself never fails: records on an invalid context
//! are dropped, empty reads and clears are no-ops, and allocation failure
//! aborts. Errors come from the lifecycle and supervisor layers.
//!
//! # Error Categories
//!
//! ## Programming Errors
//! - `ThreadAffinity` - Group touched from a thread that is not its worker
//! - `InvalidState` - Internal bookkeeping disagrees with itself
//! - `Internal` - Should never happen
//!
//! ## Lookup Errors
//! - `UnknownIsolate` / `UnknownGroup` - Id not registered with the host
//! - `Handle` - Binding object handle from an earlier generation
//!
//! ## Worker Errors
//! - `WorkerSpawn` - OS refused to create the worker thread
//! - `WorkerDisconnected` - Worker exited while a task was pending
//!
//! ## Input Errors
//! - `Configuration` - Invalid configuration
//! - `Payload` - Payload cannot be encoded for the record

use relay_util::{HandleError, PayloadError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::isolate::{IsolateId, ThreadGroupId};
use crate::runtime::ThreadKey;

/// Main error type for relay operations
///
/// # Examples
///
/// ```rust
/// use relay_core::error::RelayError;
///
/// fn report(err: RelayError) {
///     match err {
///         RelayError::UnknownIsolate(id) => eprintln!("no such isolate: {}", id),
///         err if err.is_bug() => panic!("relay bug: {}", err),
///         err => eprintln!("relay error: {}", err),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum RelayError {
    /// Invalid configuration
    ///
    /// **When returned:** `RelayConfig::validate` rejects a value
    ///
    /// **Recovery strategy:** Fix the configuration and retry
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Thread-affinity violation
    ///
    /// **When returned:** A group is attached to or detached from a thread
    /// other than its designated worker. Asserted in debug builds.
    ///
    /// **Recovery strategy:** None - caller bug
    #[error("Thread-group {group} belongs to thread {expected}, not {actual}")]
    ThreadAffinity {
        group: ThreadGroupId,
        expected: ThreadKey,
        actual: ThreadKey,
    },

    /// Isolate id not known to the host
    #[error("Unknown isolate: {0}")]
    UnknownIsolate(IsolateId),

    /// Thread-group id has no worker
    #[error("Unknown thread-group: {0}")]
    UnknownGroup(ThreadGroupId),

    /// Binding object handle is stale, or the arena is full
    ///
    /// **When returned:** An execution-context operation names an object
    /// that has already been disposed
    ///
    /// **Recovery strategy:** Drop the operation
    #[error("Binding handle error: {0}")]
    Handle(#[from] HandleError),

    /// Payload rejected
    #[error("Invalid payload: {0}")]
    Payload(#[from] PayloadError),

    /// Worker thread could not be spawned
    ///
    /// **Recovery strategy:** Retry later or run the isolate non-dedicated
    #[error("Failed to spawn worker for thread-group {group}: {source}")]
    WorkerSpawn {
        group: ThreadGroupId,
        #[source]
        source: std::io::Error,
    },

    /// Worker thread went away while a task was queued or running
    ///
    /// **When returned:** The worker panicked or was shut down
    #[error("Worker for thread-group {0} disconnected")]
    WorkerDisconnected(ThreadGroupId),

    /// Invalid internal state
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Internal error - should never happen
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Check if the caller can reasonably retry or continue
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RelayError::UnknownIsolate(_)
                | RelayError::UnknownGroup(_)
                | RelayError::Handle(_)
                | RelayError::Payload(_)
                | RelayError::WorkerSpawn { .. }
        )
    }

    /// Check if the error indicates a bug in the embedding or in relay
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            RelayError::ThreadAffinity { .. }
                | RelayError::InvalidState { .. }
                | RelayError::Internal(_)
        )
    }

    /// Shorthand for [`RelayError::InvalidState`]
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        RelayError::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, RelayError>;
