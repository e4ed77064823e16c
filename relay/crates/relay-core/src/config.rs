//! Configuration Module - Relay Tuning Parameters
//!
//! Host-wide settings live in [`RelayConfig`]; per-isolate choices made at
//! creation time live in [`IsolateConfig`].

use crate::command::DEFAULT_COMMAND_CAPACITY;
use crate::isolate::ThreadGroupId;
use crate::pipeline::{PipelineOptions, DEFAULT_MAX_SPIN_ITERATIONS, DEFAULT_SYNC_BUFFER_SIZE};

/// Main configuration for an isolate host
///
/// # Examples
///
/// ```rust
/// use relay_core::RelayConfig;
///
/// // Larger working set before the strategy checkpoints
/// let config = RelayConfig {
///     sync_buffer_size: 256,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// SyncStrategy bitmap capacity, in distinct object handles
    ///
    /// Undersizing folds more often (less batching); oversizing delays
    /// visibility. Never a correctness parameter.
    /// Default: 64
    pub sync_buffer_size: usize,

    /// Starting capacity of every command buffer, in records
    ///
    /// Default: 2048
    pub initial_command_capacity: usize,

    /// Spins on the visibility barrier before a waiter yields
    ///
    /// Default: 1024
    pub max_spin_iterations: usize,

    /// Name prefix for worker threads (`<prefix>-<group>`)
    ///
    /// Default: "relay-worker"
    pub worker_thread_prefix: String,

    /// Maximum lifecycle events kept by the host's event log
    ///
    /// Default: 1024
    pub event_log_capacity: usize,

    /// Echo lifecycle events through the `log` facade at info level
    ///
    /// Default: false
    pub verbose: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            sync_buffer_size: DEFAULT_SYNC_BUFFER_SIZE,
            initial_command_capacity: DEFAULT_COMMAND_CAPACITY,
            max_spin_iterations: DEFAULT_MAX_SPIN_ITERATIONS,
            worker_thread_prefix: "relay-worker".to_string(),
            event_log_capacity: 1024,
            verbose: false,
        }
    }
}

impl RelayConfig {
    /// Validate configuration
    ///
    /// # Examples
    ///
    /// ```rust
    /// use relay_core::RelayConfig;
    ///
    /// let config = RelayConfig {
    ///     sync_buffer_size: 0,  // Invalid!
    ///     ..Default::default()
    /// };
    ///
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_sync_buffer_size(self.sync_buffer_size)?;

        if self.initial_command_capacity == 0 {
            return Err(ConfigError::InvalidCommandCapacity(
                "initial_command_capacity must be > 0".to_string(),
            ));
        }

        if self.initial_command_capacity > MAX_INITIAL_CAPACITY {
            return Err(ConfigError::InvalidCommandCapacity(format!(
                "initial_command_capacity must be <= {}",
                MAX_INITIAL_CAPACITY
            )));
        }

        if self.max_spin_iterations == 0 {
            return Err(ConfigError::InvalidSpinLimit(
                "max_spin_iterations must be > 0".to_string(),
            ));
        }

        if self.worker_thread_prefix.is_empty() {
            return Err(ConfigError::InvalidThreadPrefix(
                "worker_thread_prefix must not be empty".to_string(),
            ));
        }

        if self.worker_thread_prefix.contains('\0') {
            return Err(ConfigError::InvalidThreadPrefix(
                "worker_thread_prefix must not contain NUL".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - RELAY_SYNC_BUFFER_SIZE
    /// - RELAY_COMMAND_CAPACITY
    /// - RELAY_SPIN_LIMIT
    /// - RELAY_VERBOSE
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply the `RELAY_*` environment overrides on top of `self`
    pub fn with_env_overrides(self) -> Self {
        let mut config = self;

        if let Ok(val) = std::env::var("RELAY_SYNC_BUFFER_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                config.sync_buffer_size = size;
            }
        }

        if let Ok(val) = std::env::var("RELAY_COMMAND_CAPACITY") {
            if let Ok(capacity) = val.parse::<usize>() {
                config.initial_command_capacity = capacity;
            }
        }

        if let Ok(val) = std::env::var("RELAY_SPIN_LIMIT") {
            if let Ok(spins) = val.parse::<usize>() {
                config.max_spin_iterations = spins;
            }
        }

        if let Ok(val) = std::env::var("RELAY_VERBOSE") {
            config.verbose = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Pipeline options for an isolate created under this configuration
    pub fn pipeline_options(&self, isolate: &IsolateConfig) -> PipelineOptions {
        PipelineOptions {
            dedicated: isolate.dedicated,
            sync_buffer_size: isolate.sync_buffer_size.unwrap_or(self.sync_buffer_size),
            initial_capacity: self.initial_command_capacity,
            max_spin_iterations: self.max_spin_iterations,
        }
    }
}

/// Per-isolate creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsolateConfig {
    /// Run on the group's worker thread with the three-stage pipeline
    pub dedicated: bool,
    /// Thread-group for dedicated isolates; ignored otherwise
    pub group: ThreadGroupId,
    /// Override of [`RelayConfig::sync_buffer_size`]
    pub sync_buffer_size: Option<usize>,
}

impl IsolateConfig {
    /// Dedicated isolate on `group`
    pub fn dedicated(group: ThreadGroupId) -> Self {
        Self {
            dedicated: true,
            group,
            sync_buffer_size: None,
        }
    }

    /// Isolate sharing the host's thread
    pub fn shared() -> Self {
        Self {
            dedicated: false,
            group: ThreadGroupId::HOST,
            sync_buffer_size: None,
        }
    }

    /// Set the bitmap capacity for this isolate
    pub fn with_sync_buffer_size(mut self, size: usize) -> Self {
        self.sync_buffer_size = Some(size);
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(size) = self.sync_buffer_size {
            validate_sync_buffer_size(size)?;
        }
        if self.dedicated && self.group == ThreadGroupId::HOST {
            return Err(ConfigError::InvalidGroup(
                "dedicated isolates need a worker thread-group, not the host group".to_string(),
            ));
        }
        Ok(())
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid sync buffer size: {0}")]
    InvalidSyncBufferSize(String),

    #[error("Invalid command capacity: {0}")]
    InvalidCommandCapacity(String),

    #[error("Invalid spin limit: {0}")]
    InvalidSpinLimit(String),

    #[error("Invalid thread prefix: {0}")]
    InvalidThreadPrefix(String),

    #[error("Invalid thread-group: {0}")]
    InvalidGroup(String),
}

// ============================================================================
// CONSTANTS & HELPERS
// ============================================================================

/// Largest accepted bitmap capacity
const MAX_SYNC_BUFFER_SIZE: usize = 1 << 20;

/// Largest accepted starting capacity (records)
const MAX_INITIAL_CAPACITY: usize = 1 << 24;

fn validate_sync_buffer_size(size: usize) -> Result<(), ConfigError> {
    if size == 0 {
        return Err(ConfigError::InvalidSyncBufferSize(
            "sync_buffer_size must be > 0".to_string(),
        ));
    }
    if size > MAX_SYNC_BUFFER_SIZE {
        return Err(ConfigError::InvalidSyncBufferSize(format!(
            "sync_buffer_size must be <= {}",
            MAX_SYNC_BUFFER_SIZE
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync_buffer_size, 64);
        assert_eq!(config.initial_command_capacity, 2048);
        assert!(!config.verbose);
    }

    #[test]
    fn test_invalid_sync_buffer_size() {
        let config = RelayConfig {
            sync_buffer_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSyncBufferSize(_))
        ));
    }

    #[test]
    fn test_invalid_thread_prefix() {
        let config = RelayConfig {
            worker_thread_prefix: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_isolate_override_wins() {
        let config = RelayConfig::default();
        let isolate = IsolateConfig::dedicated(ThreadGroupId::new(1)).with_sync_buffer_size(8);
        let options = config.pipeline_options(&isolate);
        assert!(options.dedicated);
        assert_eq!(options.sync_buffer_size, 8);
        assert_eq!(options.initial_capacity, 2048);
    }

    #[test]
    fn test_dedicated_on_host_group_rejected() {
        let isolate = IsolateConfig::dedicated(ThreadGroupId::HOST);
        assert!(matches!(
            isolate.validate(),
            Err(ConfigError::InvalidGroup(_))
        ));
    }
}
