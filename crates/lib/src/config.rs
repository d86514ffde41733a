//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.parley/config.json`) and environment.
//! Covers the chat backend endpoint, the identity service, and chat behavior knobs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Chat backend endpoint.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Identity service and device key settings.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Chat behavior (context window, failure reset delay).
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Chat backend endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Base URL of the chat backend (default "http://127.0.0.1:8943").
    #[serde(default = "default_backend_url")]
    pub url: String,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8943".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
        }
    }
}

/// Identity service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityConfig {
    /// Base URL of the identity service (default "http://127.0.0.1:8944").
    #[serde(default = "default_provider_url")]
    pub provider_url: String,

    /// Device keypair file. Defaults to `device.json` next to the config file.
    pub device_path: Option<PathBuf>,
}

fn default_provider_url() -> String {
    "http://127.0.0.1:8944".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            provider_url: default_provider_url(),
            device_path: None,
        }
    }
}

/// Chat behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// How many trailing messages are sent as conversational context (default 7).
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Delay before a failed chat turn resets the session state, in milliseconds (default 1500).
    #[serde(default = "default_reset_delay_ms")]
    pub reset_delay_ms: u64,
}

fn default_history_window() -> usize {
    7
}

fn default_reset_delay_ms() -> u64 {
    1500
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            reset_delay_ms: default_reset_delay_ms(),
        }
    }
}

/// Resolve the backend URL: env PARLEY_BACKEND_URL overrides config.
pub fn resolve_backend_url(config: &Config) -> String {
    std::env::var("PARLEY_BACKEND_URL")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| config.backend.url.trim().to_string())
}

/// Resolve the identity service URL: env PARLEY_IDENTITY_URL overrides config.
pub fn resolve_identity_url(config: &Config) -> String {
    std::env::var("PARLEY_IDENTITY_URL")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| config.identity.provider_url.trim().to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("PARLEY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".parley").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Resolve the device keypair path: `config.identity.devicePath` if set (relative paths
/// resolved against the config file's parent), otherwise `device.json` next to the config.
pub fn resolve_device_path(config: &Config, config_path: &std::path::Path) -> PathBuf {
    let config_parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    match &config.identity.device_path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                config_parent.join(p)
            }
        }
        _ => config_parent.join("device.json"),
    }
}

/// Load config from the default path (or PARLEY_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving sibling files).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn default_endpoints_and_knobs() {
        let c = Config::default();
        assert_eq!(c.backend.url, "http://127.0.0.1:8943");
        assert_eq!(c.identity.provider_url, "http://127.0.0.1:8944");
        assert_eq!(c.chat.history_window, 7);
        assert_eq!(c.chat.reset_delay_ms, 1500);
    }

    #[test]
    fn resolve_device_path_default() {
        let config = Config::default();
        let path = Path::new("/home/user/.parley/config.json");
        assert_eq!(
            resolve_device_path(&config, path),
            PathBuf::from("/home/user/.parley/device.json")
        );
    }

    #[test]
    fn resolve_device_path_override_relative() {
        let mut config = Config::default();
        config.identity.device_path = Some(PathBuf::from("keys/device.json"));
        let path = Path::new("/home/user/.parley/config.json");
        assert_eq!(
            resolve_device_path(&config, path),
            PathBuf::from("/home/user/.parley/keys/device.json")
        );
    }

    #[test]
    fn resolve_device_path_override_absolute() {
        let mut config = Config::default();
        config.identity.device_path = Some(PathBuf::from("/keys/device.json"));
        let path = Path::new("/home/user/.parley/config.json");
        assert_eq!(
            resolve_device_path(&config, path),
            PathBuf::from("/keys/device.json")
        );
    }

    #[test]
    fn empty_config_parses_to_defaults() {
        let c: Config = serde_json::from_str("{}").expect("parse empty config");
        assert_eq!(c.backend.url, "http://127.0.0.1:8943");
        assert_eq!(c.chat.history_window, 7);
    }
}
