//! relayctl - drive the isolate command relay from the command line.
//!
//! `simulate` runs a synthetic multi-group workload through a real host and
//! verifies that the consumer sees every command in order. `config` shows or
//! writes the configuration file.

mod commands;
mod config;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{
    run_config_init, run_config_show, run_simulate, ConfigInitArgs, ReportFormat, SimulateArgs,
};
use config::Config;
use error::{RelayctlError, Result};

/// Environment variable holding the tracing filter directives.
const LOG_ENV: &str = "RELAYCTL_LOG";

/// relayctl - isolate command relay simulator
#[derive(Parser, Debug)]
#[command(name = "relayctl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Simulate and inspect the isolate command relay", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, env = "RELAYCTL_VERBOSE")]
    verbose: bool,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "RELAYCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Disable color output
    #[arg(long, global = true, env = "RELAYCTL_NO_COLOR")]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a synthetic workload and verify delivery
    ///
    /// Every isolate records event-wiring commands on its own thread while
    /// this thread consumes the batches, checking order and completeness.
    Simulate(SimulateCommand),

    /// Show or create the configuration file
    Config(ConfigCommand),
}

/// Arguments for the simulate subcommand; unset values come from config.
#[derive(Parser, Debug)]
struct SimulateCommand {
    /// Thread-groups, one worker each
    #[arg(short, long)]
    groups: Option<u32>,

    /// Dedicated isolates per group
    #[arg(short, long)]
    isolates: Option<u32>,

    /// Isolates on the host thread
    #[arg(short, long)]
    shared: Option<u32>,

    /// Commands each isolate records
    #[arg(short = 'n', long)]
    commands: Option<u64>,

    /// Finish marker every N commands (0: only at the end)
    #[arg(long)]
    finish_every: Option<u64>,

    /// Dirty-bitmap capacity per dedicated isolate
    #[arg(long)]
    sync_buffer_size: Option<usize>,

    /// Seconds to wait for the consumer
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Report format
    #[arg(short = 'F', long, value_enum, default_value_t = ReportFormat::Text)]
    format: ReportFormat,

    /// Include lifecycle events in the report
    #[arg(long)]
    events: bool,
}

/// Arguments for the config subcommand.
#[derive(Parser, Debug)]
struct ConfigCommand {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Write a configuration file holding the defaults
    Init {
        /// Destination (default: ./relayctl.toml)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.no_color)?;

    match cli.command {
        // Must work even when the file it would replace is broken.
        Commands::Config(ConfigCommand {
            action: ConfigAction::Init { path, force },
        }) => run_config_init(ConfigInitArgs {
            path,
            force,
            verbose: cli.verbose,
        }),
        command => {
            let config = load_config(cli.config.as_deref())?;
            execute_command(command, cli.verbose, config)
        },
    }
}

/// Initialize tracing; `log` records from the relay crates are captured too.
///
/// `RELAYCTL_LOG` takes filter directives; otherwise `--verbose` selects
/// debug and everything else warn. Output goes to stderr so reports on
/// stdout stay machine-readable.
fn init_logging(verbose: bool, no_color: bool) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    let subscriber = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .with_target(false)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(subscriber)
        .try_init()
        .map_err(|e| RelayctlError::Config(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Load configuration from file or use defaults.
fn load_config(config_path: Option<&std::path::Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

fn execute_command(command: Commands, verbose: bool, config: Config) -> Result<()> {
    match command {
        Commands::Simulate(args) => execute_simulate(args, verbose, config),
        Commands::Config(args) => match args.action {
            ConfigAction::Show => run_config_show(&config),
            ConfigAction::Init { path, force } => run_config_init(ConfigInitArgs {
                path,
                force,
                verbose,
            }),
        },
    }
}

/// Merge flags over the loaded configuration and run the simulation.
fn execute_simulate(args: SimulateCommand, verbose: bool, config: Config) -> Result<()> {
    let simulate_args = simulate_args(args, verbose, config);
    run_simulate(simulate_args)
}

fn simulate_args(args: SimulateCommand, verbose: bool, config: Config) -> SimulateArgs {
    let mut relay = config.relay_config();
    if let Some(size) = args.sync_buffer_size {
        relay.sync_buffer_size = size;
    }
    relay.verbose |= verbose;

    let mut workload = config.workload;
    if let Some(groups) = args.groups {
        workload.groups = groups;
    }
    if let Some(isolates) = args.isolates {
        workload.isolates_per_group = isolates;
    }
    if let Some(shared) = args.shared {
        workload.shared_isolates = shared;
    }
    if let Some(commands) = args.commands {
        workload.commands_per_isolate = commands;
    }
    if let Some(finish_every) = args.finish_every {
        workload.finish_every = finish_every;
    }
    if let Some(timeout) = args.timeout {
        workload.timeout_secs = timeout;
    }

    SimulateArgs {
        workload,
        relay,
        format: args.format,
        show_events: args.events,
        verbose: verbose || config.verbose,
    }
}
