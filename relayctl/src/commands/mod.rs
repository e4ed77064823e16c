//! Command modules for the relayctl CLI.
//!
//! Each subcommand lives in its own file: an args struct, a command type
//! with `run`, and a `run_*` entry point called from `main`.

pub mod config;
pub mod simulate;

pub use config::{run_config_init, run_config_show, ConfigInitArgs};
pub use simulate::{run_simulate, SimulateArgs};

/// How reports are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ReportFormat {
    /// Human-readable summary
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
}
