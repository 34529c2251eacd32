//! Configuration resolution for replgate.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/replgate/settings.json)
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by each binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Complete replgate configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub repl: ReplSettings,
    #[serde(default)]
    pub client: ClientSettings,
}

/// HTTP gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// How long a request waits for the REPL's printed value.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5533,
            timeout: Duration::from_secs(4),
            log_level: "info".to_string(),
        }
    }
}

/// REPL subprocess settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReplSettings {
    pub executable: PathBuf,
    pub args: Vec<String>,
    /// Size of each read from the REPL's stdout and stderr.
    pub buffer_size: usize,
    /// Code submitted before kill and reload to release REPL resources.
    pub quit_command: String,
    /// Interval of the warnings logged while kill or reload waits for the
    /// quit command's value.
    #[serde(with = "humantime_serde")]
    pub drain_warn_interval: Duration,
    /// How long the next capture waits for the value of one that timed out.
    #[serde(with = "humantime_serde")]
    pub late_result_window: Duration,
}

impl Default for ReplSettings {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("sclang"),
            args: Vec::new(),
            buffer_size: 1024,
            quit_command: "Server.quitAll;".to_string(),
            drain_warn_interval: Duration::from_secs(10),
            late_result_window: Duration::from_secs(4),
        }
    }
}

/// Settings for the `replgate-client` tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientSettings {
    pub url: String,
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub retry_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost".to_string(),
            port: 5533,
            timeout: Duration::from_secs(10),
            retry_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Reject values the daemon cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.repl.buffer_size == 0 {
            return Err(Error::Config("repl.buffer_size must be positive".into()));
        }
        if self.repl.drain_warn_interval.is_zero() {
            return Err(Error::Config("repl.drain_warn_interval must be positive".into()));
        }
        if self.repl.executable.as_os_str().is_empty() {
            return Err(Error::Config("repl.executable must not be empty".into()));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config() -> Result<Config> {
    let mut config = match global_config_path() {
        Some(path) if path.exists() => {
            debug!(path = %path.display(), "Loading global config");
            load_config_file(&path)?
        }
        _ => Config::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .map(|p| p.join("replgate").join("settings.json"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        dirs::config_dir().map(|p| p.join("replgate").join("settings.json"))
    }
}

/// Read a settings file. Missing sections and fields keep their defaults.
pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply `REPLGATE_*` overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("REPLGATE_HOST") {
        config.server.host = val;
    }
    if let Some(val) = lookup("REPLGATE_PORT") {
        config.server.port = val
            .parse()
            .map_err(|e| Error::Config(format!("REPLGATE_PORT={val}: {e}")))?;
    }
    if let Some(val) = lookup("REPLGATE_TIMEOUT") {
        config.server.timeout = parse_duration(&val)?;
    }
    if let Some(val) = lookup("REPLGATE_BUFFER_SIZE") {
        config.repl.buffer_size = val
            .parse()
            .map_err(|e| Error::Config(format!("REPLGATE_BUFFER_SIZE={val}: {e}")))?;
    }
    if let Some(val) = lookup("REPLGATE_REPL") {
        config.repl.executable = PathBuf::from(val);
    }
    if let Some(val) = lookup("REPLGATE_LOG_LEVEL") {
        config.server.log_level = val;
    }
    Ok(())
}

/// Parse a human readable duration such as `4s` or `250ms`.
pub fn parse_duration(value: &str) -> Result<Duration> {
    humantime::parse_duration(value).map_err(|e| Error::Duration {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
