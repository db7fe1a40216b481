//! Configuration resolution for Cortical.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/cortical/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Complete Cortical configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub hub: HubConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Path the upgrade endpoint is mounted on.
    pub ws_path: String,
    /// Directory served for every other GET path, if any.
    pub static_dir: Option<PathBuf>,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ws_path: "/ws".to_string(),
            static_dir: None,
            log_level: "info".to_string(),
        }
    }
}

/// What happens to a session when one of its cortices fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Detach the failing consumer; every other cortex keeps running.
    #[default]
    Isolate,
    /// Drain and close the whole session.
    EndSession,
}

impl std::str::FromStr for FailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "isolate" => Ok(Self::Isolate),
            "end-session" => Ok(Self::EndSession),
            other => Err(Error::Config(format!(
                "unknown failure policy '{other}' (expected 'isolate' or 'end-session')"
            ))),
        }
    }
}

/// Per-session dispatch engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HubConfig {
    /// Depth of the channel between the read loop and the fan-out stage.
    pub inbound_buffer: usize,
    /// Per-subscriber fan-out depth; bounds how far a slow consumer may lag.
    pub subscriber_buffer: usize,
    /// Depth of the merged outbound channel feeding the write loop.
    pub merge_buffer: usize,
    /// Depth of the write loop's control lane (structured error replies).
    pub control_buffer: usize,
    /// Consecutive transient I/O errors tolerated per loop before the
    /// session is treated as abnormally closed.
    pub max_transient_errors: u32,
    /// Upper bound on waiting for engine tasks once a session drains.
    pub shutdown_grace_ms: u64,
    /// Optional ceiling on a single consumer invocation.
    pub consumer_timeout_ms: Option<u64>,
    pub failure_policy: FailurePolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            inbound_buffer: 1,
            subscriber_buffer: 1,
            merge_buffer: 1,
            control_buffer: 8,
            max_transient_errors: 16,
            shutdown_grace_ms: 5_000,
            consumer_timeout_ms: None,
            failure_policy: FailurePolicy::Isolate,
        }
    }
}

impl HubConfig {
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn consumer_timeout(&self) -> Option<Duration> {
        self.consumer_timeout_ms.map(Duration::from_millis)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("inbound_buffer", self.inbound_buffer),
            ("subscriber_buffer", self.subscriber_buffer),
            ("merge_buffer", self.merge_buffer),
            ("control_buffer", self.control_buffer),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("hub.{name} must be at least 1")));
            }
        }
        if self.shutdown_grace_ms == 0 {
            return Err(Error::Config(
                "hub.shutdown_grace_ms must be at least 1".to_string(),
            ));
        }
        if self.consumer_timeout_ms == Some(0) {
            return Err(Error::Config(
                "hub.consumer_timeout_ms must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !self.server.ws_path.starts_with('/') {
            return Err(Error::Config(format!(
                "server.ws_path must start with '/', got '{}'",
                self.server.ws_path
            )));
        }
        if matches!(self.server.ws_path.as_str(), "/" | "/health") {
            return Err(Error::Config(format!(
                "server.ws_path must not be '{}'",
                self.server.ws_path
            )));
        }
        self.hub.validate()
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        merge_json(&mut merged, load_config_file(&global_path)?);
    }

    if let Some(path) = explicit {
        merge_json(&mut merged, load_config_file(path)?);
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".cortical").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/cortical/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("cortical").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Deep-merge `overlay` into `base`; objects merge key by key, anything else
/// replaces.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::Config(format!("{key} has an invalid value: '{raw}'")))
}

/// Apply `CORTICAL_*` overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("CORTICAL_LOG_LEVEL") {
        config.server.log_level = val;
    }
    if let Some(val) = lookup("CORTICAL_WS_PATH") {
        config.server.ws_path = val;
    }
    if let Some(val) = lookup("CORTICAL_INBOUND_BUFFER") {
        config.hub.inbound_buffer = parse_env("CORTICAL_INBOUND_BUFFER", &val)?;
    }
    if let Some(val) = lookup("CORTICAL_SUBSCRIBER_BUFFER") {
        config.hub.subscriber_buffer = parse_env("CORTICAL_SUBSCRIBER_BUFFER", &val)?;
    }
    if let Some(val) = lookup("CORTICAL_MERGE_BUFFER") {
        config.hub.merge_buffer = parse_env("CORTICAL_MERGE_BUFFER", &val)?;
    }
    if let Some(val) = lookup("CORTICAL_CONTROL_BUFFER") {
        config.hub.control_buffer = parse_env("CORTICAL_CONTROL_BUFFER", &val)?;
    }
    if let Some(val) = lookup("CORTICAL_MAX_TRANSIENT_ERRORS") {
        config.hub.max_transient_errors = parse_env("CORTICAL_MAX_TRANSIENT_ERRORS", &val)?;
    }
    if let Some(val) = lookup("CORTICAL_SHUTDOWN_GRACE_MS") {
        config.hub.shutdown_grace_ms = parse_env("CORTICAL_SHUTDOWN_GRACE_MS", &val)?;
    }
    if let Some(val) = lookup("CORTICAL_CONSUMER_TIMEOUT_MS") {
        config.hub.consumer_timeout_ms = Some(parse_env("CORTICAL_CONSUMER_TIMEOUT_MS", &val)?);
    }
    if let Some(val) = lookup("CORTICAL_FAILURE_POLICY") {
        config.hub.failure_policy = val.parse()?;
    }
    Ok(())
}
