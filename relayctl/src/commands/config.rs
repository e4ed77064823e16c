//! Config command implementation.
//!
//! `config show` prints the effective configuration; `config init` writes a
//! file holding the defaults for editing.

use std::path::PathBuf;

use crate::config::{Config, CONFIG_FILE_NAME};
use crate::error::{RelayctlError, Result};

/// Arguments for `config init`.
#[derive(Debug, Clone, Default)]
pub struct ConfigInitArgs {
    /// Where to write; `relayctl.toml` in the current directory if unset
    pub path: Option<PathBuf>,
    /// Overwrite an existing file
    pub force: bool,
    pub verbose: bool,
}

/// Write the default configuration, returning the path written.
pub fn init_config_file(args: &ConfigInitArgs) -> Result<PathBuf> {
    let path = args
        .path
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

    if path.exists() && !args.force {
        return Err(RelayctlError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }

    Config::default().save_to_path(&path)?;
    if args.verbose {
        tracing::debug!("Wrote default configuration to {}", path.display());
    }
    Ok(path)
}

/// Execute `config init`.
pub fn run_config_init(args: ConfigInitArgs) -> Result<()> {
    let path = init_config_file(&args)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Execute `config show`.
pub fn run_config_show(config: &Config) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE_NAME);
        let args = ConfigInitArgs {
            path: Some(path.clone()),
            ..Default::default()
        };

        assert_eq!(init_config_file(&args).unwrap(), path);
        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "verbose = true\n").unwrap();

        let mut args = ConfigInitArgs {
            path: Some(path.clone()),
            ..Default::default()
        };
        assert!(matches!(
            init_config_file(&args),
            Err(RelayctlError::Config(_))
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "verbose = true\n");

        args.force = true;
        init_config_file(&args).unwrap();
        assert!(!Config::load_from_path(&path).unwrap().verbose);
    }
}
