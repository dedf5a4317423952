//! Server configuration – reads `~/.sockbridge/config.toml`.
//!
//! Precedence, lowest to highest: built-in defaults, the config file,
//! `SOCKBRIDGE_*` environment variables, command-line arguments.

use serde::{Deserialize, Serialize};
use sockbridge_types::BridgeError;
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Interface to listen on.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Events buffered by the bus before slow subscribers start lagging.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Longest accepted request line, in bytes.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9000
}
fn default_bus_capacity() -> usize {
    sockbridge_middleware::bus::DEFAULT_CAPACITY
}
fn default_max_frame_len() -> usize {
    sockbridge_server::DEFAULT_MAX_FRAME_LEN
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            bus_capacity: default_bus_capacity(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl Config {
    /// `host:port` string suitable for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.bus_capacity == 0 {
            return Err(BridgeError::Config("bus_capacity must be at least 1".to_string()));
        }
        if self.max_frame_len == 0 {
            return Err(BridgeError::Config("max_frame_len must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Return the path to `~/.sockbridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".sockbridge").join("config.toml")
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("Failed to read config at {}: {}", path.display(), e))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)))?;
    Ok(Some(cfg))
}

/// Apply `SOCKBRIDGE_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `SOCKBRIDGE_HOST` | `host` |
/// | `SOCKBRIDGE_PORT` | `port` |
/// | `SOCKBRIDGE_BUS_CAPACITY` | `bus_capacity` |
/// | `SOCKBRIDGE_MAX_FRAME_LEN` | `max_frame_len` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("SOCKBRIDGE_HOST") {
        cfg.host = v;
    }
    if let Some(v) = var("SOCKBRIDGE_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.port = port;
    }
    if let Some(v) = var("SOCKBRIDGE_BUS_CAPACITY")
        && let Ok(capacity) = v.parse::<usize>()
    {
        cfg.bus_capacity = capacity;
    }
    if let Some(v) = var("SOCKBRIDGE_MAX_FRAME_LEN")
        && let Ok(len) = v.parse::<usize>()
    {
        cfg.max_frame_len = len;
    }
}
