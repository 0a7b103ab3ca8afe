//! User configuration for debugger sessions.
//!
//! Configuration is read from `config.toml` in the `dbgctl` directory under
//! the platform configuration directory. A missing file is not an error: every
//! setting has a default.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use eyre::WrapErr;
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "dbgctl";
const FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Behaviour of the session control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// A request unanswered for this long fails its command
    pub request_timeout_ms: u64,
    /// Re-evaluate every watch expression when the debuggee pauses or a frame is selected
    pub evaluate_on_pause: bool,
    /// Fetch scopes when selecting a frame whose scopes are not loaded yet
    pub fetch_scopes_on_select: bool,
    /// Capacity hint for event subscribers
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            evaluate_on_pause: true,
            fetch_scopes_on_select: true,
            event_buffer: 256,
        }
    }
}

impl SessionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable on a terminal, JSON otherwise
    #[default]
    Auto,
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives used when `RUST_LOG` is not set
    pub filter: Option<String>,
}

/// Location of the configuration file, if the platform has a configuration directory
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(FILE_NAME))
}

impl FromStr for Config {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).wrap_err("parsing configuration")
    }
}

impl Config {
    pub fn load_from(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading configuration from {}", path.display()))?;
        contents
            .parse::<Self>()
            .wrap_err_with(|| format!("invalid configuration {}", path.display()))
    }

    /// Load from `path`, or from the default location when `path` is `None`.
    ///
    /// Falls back to the defaults if the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> eyre::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_path() {
                Some(path) => path,
                None => {
                    tracing::debug!("no configuration directory, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            tracing::debug!(path = %path.display(), "configuration file not found, using defaults");
            return Ok(Self::default());
        }
        let config = Self::load_from(&path)?;
        tracing::debug!(path = %path.display(), ?config, "loaded configuration");
        Ok(config)
    }
}
