// Adapter configuration, login options and connection credentials

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batcher::BatchPolicy;

/// Port used when the credentials leave the port empty
pub const DEFAULT_PORT: u16 = 16667;

const APP_DIR: &str = "ircsocial";
const CONFIG_FILE: &str = "config.json";

// RFC 2812 nickname grammar, with the common 30 character limit
static NICK_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z\[\]\\`_^{|}][A-Za-z0-9\[\]\\`_^{|}-]{0,29}$").ok()
});

static CONFIG_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Channel joined after registration when neither credentials nor login options name one
    pub default_channel: String,
    /// Capability marker advertised as realname and matched against peers' presence
    pub capability: String,
    pub default_port: u16,
    /// Form id passed to the credential view
    pub login_form: String,
    pub batch_delay_ms: u64,
    pub max_batch_window_ms: u64,
    /// Hostname for the USER line; the local hostname when unset
    pub hostname: Option<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            default_channel: "#social".to_string(),
            capability: format!("{}/{}", APP_DIR, env!("CARGO_PKG_VERSION")),
            default_port: DEFAULT_PORT,
            login_form: "irc-login".to_string(),
            batch_delay_ms: 100,
            max_batch_window_ms: 2000,
            hostname: None,
        }
    }
}

impl AdapterConfig {
    pub fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy {
            delay: Duration::from_millis(self.batch_delay_ms),
            max_window: Duration::from_millis(self.max_batch_window_ms),
        }
    }

    /// Load from the config directory, falling back to defaults, then apply env overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&config_path()?)?;
        config.apply_env();
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AdapterConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(channel) = std::env::var("IRCSOCIAL_CHANNEL") {
            if !channel.trim().is_empty() {
                self.default_channel = channel.trim().to_string();
            }
        }
        if let Ok(port) = std::env::var("IRCSOCIAL_PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) if port != 0 => self.default_port = port,
                _ => warn!("Ignoring invalid IRCSOCIAL_PORT value '{}'", port),
            }
        }
    }

    /// Hostname to advertise in the USER line
    pub fn resolve_hostname(&self) -> String {
        if let Some(hostname) = &self.hostname {
            return hostname.clone();
        }
        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

/// Options supplied by the outer application with `login`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginOptions {
    pub agent: String,
    pub version: String,
    /// Overrides the configured capability marker
    pub capability: Option<String>,
    /// Host to use when the credentials leave it empty
    pub host: Option<String>,
    pub room: Option<String>,
}

/// Connection credentials held by the session while logged in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub user_id: String,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

pub fn is_valid_nick(nick: &str) -> bool {
    NICK_PATTERN
        .as_ref()
        .map_or(false, |pattern| pattern.is_match(nick))
}

pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(path) = CONFIG_PATH_OVERRIDE.get() {
        if let Some(parent) = path.parent() {
            return Ok(parent.to_path_buf());
        }
    }
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join(APP_DIR);

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Use `path` as the config file for the rest of the process
pub fn set_config_path_override(path: PathBuf) -> Result<()> {
    CONFIG_PATH_OVERRIDE
        .set(path)
        .map_err(|path| anyhow!("Config path already set, ignoring {}", path.display()))
}

pub fn config_path() -> Result<PathBuf> {
    if let Some(path) = CONFIG_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    Ok(get_config_dir()?.join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AdapterConfig::default();
        assert_eq!(config.default_port, DEFAULT_PORT);
        assert_ne!(config.default_port, 6667);
        assert_eq!(config.batch_policy(), BatchPolicy::default());
        assert!(config.capability.starts_with("ircsocial/"));
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r##"{{"default_channel": "#team", "batch_delay_ms": 50}}"##).unwrap();

        let config = AdapterConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_channel, "#team");
        assert_eq!(config.batch_delay_ms, 50);
        assert_eq!(config.max_batch_window_ms, 2000);
        assert_eq!(config.login_form, "irc-login");
    }

    #[test]
    fn test_load_missing_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert_eq!(AdapterConfig::load_from(&missing).unwrap(), AdapterConfig::default());

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{not json").unwrap();
        assert!(AdapterConfig::load_from(&broken).is_err());
    }

    #[test]
    fn test_nick_validation() {
        assert!(is_valid_nick("alice"));
        assert!(is_valid_nick("[bot]_42"));
        assert!(!is_valid_nick(""));
        assert!(!is_valid_nick("9lives"));
        assert!(!is_valid_nick("has space"));
        assert!(!is_valid_nick("#channel"));
    }

    #[test]
    fn test_nick_pattern_compiles() {
        assert!(NICK_PATTERN.is_some());
        assert!(is_valid_nick(&"n".repeat(30)));
        assert!(!is_valid_nick(&"n".repeat(31)));
    }
}
