//! Initialize the configuration directory: create ~/.parley, default config, and the
//! device identity keypair.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;
use crate::identity::DeviceIdentity;

/// Ensure the configuration directory has been initialized (config file and device
/// identity exist).
pub fn require_initialized(config_path: &Path, config: &config::Config) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `parley init` first (config file not found: {})",
            config_path.display()
        );
    }
    let device_path = config::resolve_device_path(config, config_path);
    if !device_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `parley init` first (device identity not found: {})",
            device_path.display()
        );
    }
    Ok(())
}

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Generates and saves the device keypair if missing.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = b"{}";
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let device_path = config::resolve_device_path(&config, config_path);
    if !device_path.exists() {
        let identity = DeviceIdentity::generate()?;
        identity
            .save(&device_path)
            .with_context(|| format!("writing device identity to {}", device_path.display()))?;
        log::info!("generated device identity at {}", device_path.display());
    } else {
        log::debug!(
            "device identity already exists at {}, skipping",
            device_path.display()
        );
    }

    Ok(config_dir.to_path_buf())
}
