//! TOML-based configuration for the slotmux server.
//!
//! The config file is looked up in this order:
//!
//! 1. The path given as the first command-line argument.
//! 2. The `SLOTMUX_CONFIG` environment variable.
//! 3. The platform config directory:
//!    - Windows:  `%APPDATA%\slotmux\config.toml`
//!    - Linux:    `$XDG_CONFIG_HOME/slotmux/config.toml` or `~/.config/slotmux/config.toml`
//!    - macOS:    `~/Library/Application Support/slotmux/config.toml`
//!
//! A missing file is not an error: the defaults below are used instead.
//!
//! ```toml
//! [server]
//! port = 2323
//! poll_interval_ms = 10
//! greeting = "hello from slotmux"
//! log_level = "info"
//!
//! [timeouts]
//! dhcp_lease_secs = 14400
//! arp_cache_secs = 3600
//! keepalive_secs = 30
//! ```
//!
//! The adapter inactivity timeout is deliberately not configurable: the pool
//! always disables it so the adapter never closes the idle listening socket.
//!
//! The slot count is a compile-time constant ([`slotmux_core::DEFAULT_MAX_CLIENTS`])
//! because the slot array is allocated up front.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use slotmux_core::AdapterTimeouts;
use thiserror::Error;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV_VAR: &str = "SLOTMUX_CONFIG";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ListenConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Listener and control-loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenConfig {
    /// TCP port to listen on.  `0` picks an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Delay between readiness scans, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Line sent to each newly accepted client.  Empty disables the greeting.
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// `tracing` log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Adapter-wide timeouts in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    #[serde(default = "default_dhcp_lease_secs")]
    pub dhcp_lease_secs: u64,
    #[serde(default = "default_arp_cache_secs")]
    pub arp_cache_secs: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

impl ListenConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl TimeoutConfig {
    /// Converts to adapter timeouts with idle disconnects disabled.
    pub fn to_adapter_timeouts(&self) -> AdapterTimeouts {
        AdapterTimeouts {
            dhcp_lease: Duration::from_secs(self.dhcp_lease_secs),
            arp_cache: Duration::from_secs(self.arp_cache_secs),
            keepalive: Duration::from_secs(self.keepalive_secs),
            inactivity: Duration::ZERO,
        }
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_port() -> u16 {
    2323
}
fn default_poll_interval_ms() -> u64 {
    10
}
fn default_greeting() -> String {
    "hello from slotmux".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_dhcp_lease_secs() -> u64 {
    14_400
}
fn default_arp_cache_secs() -> u64 {
    3_600
}
fn default_keepalive_secs() -> u64 {
    30
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            poll_interval_ms: default_poll_interval_ms(),
            greeting: default_greeting(),
            log_level: default_log_level(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dhcp_lease_secs: default_dhcp_lease_secs(),
            arp_cache_secs: default_arp_cache_secs(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Picks the config file path from an explicit argument, the environment, or
/// the platform config directory, in that order.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when no explicit path is given
/// and the platform directory cannot be determined.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    resolve_config_path_with(explicit, |key| std::env::var_os(key))
}

/// [`resolve_config_path`] with environment lookups supplied by `env`.
fn resolve_config_path_with(
    explicit: Option<PathBuf>,
    env: impl Fn(&str) -> Option<OsString>,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Some(path) = env(CONFIG_ENV_VAR) {
        return Ok(PathBuf::from(path));
    }
    platform_config_dir(&env)
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config at `path`, returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir(env: impl Fn(&str) -> Option<OsString>) -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        env("APPDATA").map(|p| PathBuf::from(p).join("slotmux"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = env("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("slotmux"))
    }

    #[cfg(target_os = "macos")]
    {
        env("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("slotmux")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        let _ = env;
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
