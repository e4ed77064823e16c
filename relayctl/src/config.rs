//! Configuration module for the relayctl CLI.
//!
//! Loads `relayctl.toml`: relay tuning knobs under `[relay]` and the
//! simulated workload under `[workload]`. Precedence, lowest first:
//! built-in defaults, config file, `RELAY_*` environment, command-line flags.

use dirs::{config_dir, home_dir};
use num_cpus::get as get_num_cpus;
use relay_core::RelayConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RelayctlError, Result};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "relayctl.toml";

/// Upper bound on the default group count, whatever the core count.
const MAX_DEFAULT_GROUPS: u32 = 4;

/// Application configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// Global verbose setting.
    #[serde(default)]
    pub verbose: bool,

    /// Relay tuning overrides.
    #[serde(default)]
    pub relay: RelaySection,

    /// Simulated workload shape.
    #[serde(default)]
    pub workload: WorkloadConfig,
}

/// `[relay]` section; unset keys keep the library defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RelaySection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_buffer_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_command_capacity: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_spin_iterations: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_thread_prefix: Option<String>,
}

/// `[workload]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadConfig {
    /// Thread-groups, one worker thread each.
    #[serde(default = "default_groups")]
    pub groups: u32,

    /// Dedicated isolates per group.
    #[serde(default = "default_isolates_per_group")]
    pub isolates_per_group: u32,

    /// Isolates living on the host thread.
    #[serde(default)]
    pub shared_isolates: u32,

    /// Event-wiring commands each isolate records.
    #[serde(default = "default_commands")]
    pub commands_per_isolate: u64,

    /// Finish marker after this many commands; 0 only at the end.
    #[serde(default = "default_finish_every")]
    pub finish_every: u64,

    /// Event targets each isolate spreads its commands over.
    #[serde(default = "default_targets")]
    pub targets_per_isolate: u32,

    /// Give up waiting for the consumer after this many seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_groups() -> u32 {
    get_num_cpus()
        .try_into()
        .unwrap_or(MAX_DEFAULT_GROUPS)
        .clamp(1, MAX_DEFAULT_GROUPS)
}

fn default_isolates_per_group() -> u32 {
    2
}

fn default_commands() -> u64 {
    1000
}

fn default_finish_every() -> u64 {
    64
}

fn default_targets() -> u32 {
    16
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            groups: default_groups(),
            isolates_per_group: default_isolates_per_group(),
            shared_isolates: 0,
            commands_per_isolate: default_commands(),
            finish_every: default_finish_every(),
            targets_per_isolate: default_targets(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl WorkloadConfig {
    /// Reject shapes the simulator cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.groups == 0 && self.shared_isolates == 0 {
            return Err(RelayctlError::Config(
                "workload needs at least one group or shared isolate".to_string(),
            ));
        }
        if self.groups > 0 && self.isolates_per_group == 0 {
            return Err(RelayctlError::Config(
                "isolates_per_group must be > 0".to_string(),
            ));
        }
        if self.targets_per_isolate == 0 {
            return Err(RelayctlError::Config(
                "targets_per_isolate must be > 0".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(RelayctlError::Config("timeout_secs must be > 0".to_string()));
        }
        Ok(())
    }

    /// Total isolates the workload creates.
    pub fn isolate_count(&self) -> u64 {
        u64::from(self.groups) * u64::from(self.isolates_per_group)
            + u64::from(self.shared_isolates)
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Searches the current directory, then `~/.config/relayctl/`, then the
    /// system configuration directory. Returns the defaults if none exists.
    pub fn load() -> Result<Self> {
        match Self::find_config_file() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RelayctlError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = self.to_toml()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            RelayctlError::Config(format!("Failed to serialize configuration: {}", e))
        })
    }

    /// Relay configuration: defaults, then this file, then the environment.
    pub fn relay_config(&self) -> RelayConfig {
        let mut relay = RelayConfig {
            verbose: self.verbose,
            ..RelayConfig::default()
        };
        if let Some(size) = self.relay.sync_buffer_size {
            relay.sync_buffer_size = size;
        }
        if let Some(capacity) = self.relay.initial_command_capacity {
            relay.initial_command_capacity = capacity;
        }
        if let Some(spins) = self.relay.max_spin_iterations {
            relay.max_spin_iterations = spins;
        }
        if let Some(prefix) = &self.relay.worker_thread_prefix {
            relay.worker_thread_prefix = prefix.clone();
        }
        relay.with_env_overrides()
    }

    fn check_current_dir_config() -> Option<PathBuf> {
        let path = PathBuf::from(CONFIG_FILE_NAME);
        path.exists().then_some(path)
    }

    fn check_home_config() -> Option<PathBuf> {
        home_dir()
            .map(|dir| dir.join(".config").join("relayctl").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    fn check_system_config() -> Option<PathBuf> {
        config_dir()
            .map(|dir| dir.join("relayctl").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    fn find_config_file() -> Option<PathBuf> {
        Self::check_current_dir_config()
            .or_else(Self::check_home_config)
            .or_else(Self::check_system_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config() -> Config {
        Config {
            verbose: true,
            relay: RelaySection {
                sync_buffer_size: Some(16),
                worker_thread_prefix: Some("sim".to_string()),
                ..Default::default()
            },
            workload: WorkloadConfig {
                groups: 3,
                isolates_per_group: 1,
                shared_isolates: 2,
                commands_per_isolate: 50,
                finish_every: 0,
                targets_per_isolate: 4,
                timeout_secs: 5,
            },
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.verbose);
        assert_eq!(config.relay, RelaySection::default());
        assert!((1..=MAX_DEFAULT_GROUPS).contains(&config.workload.groups));
        assert_eq!(config.workload.commands_per_isolate, 1000);
        assert!(config.workload.validate().is_ok());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join(CONFIG_FILE_NAME);

        let original = create_test_config();
        original.save_to_path(&config_path).unwrap();

        let loaded = Config::load_from_path(&config_path).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str("[workload]\ngroups = 2\n").unwrap();
        assert_eq!(config.workload.groups, 2);
        assert_eq!(config.workload.isolates_per_group, 2);
        assert_eq!(config.workload.finish_every, 64);
        assert_eq!(config.relay.sync_buffer_size, None);
    }

    #[test]
    fn test_relay_overrides_applied() {
        let relay = create_test_config().relay_config();
        assert_eq!(relay.worker_thread_prefix, "sim");
        assert!(relay.verbose);
        assert_eq!(relay.initial_command_capacity, 2048);
    }

    #[test]
    fn test_load_from_nonexistent_path() {
        let result = Config::load_from_path(Path::new("/nonexistent/path/relayctl.toml"));
        assert!(matches!(result, Err(RelayctlError::Config(_))));
    }

    #[test]
    fn test_workload_validation() {
        let mut workload = WorkloadConfig {
            groups: 0,
            shared_isolates: 0,
            ..Default::default()
        };
        assert!(workload.validate().is_err());

        workload.shared_isolates = 1;
        assert!(workload.validate().is_ok());
        assert_eq!(workload.isolate_count(), 1);
    }
}
