//! Configuration loading and logging setup for the panel bridge.
//!
//! The config file lives at `~/.bridge/config.toml`:
//!
//! ```toml
//! [log]
//! filter = "bridge_events=debug,info"
//! file = "/tmp/bridge.log"
//!
//! [resources]
//! inactive_read = "strict"
//!
//! [events]
//! poll_budget = 64
//!
//! [servers.lean]
//! command = "lake"
//! args = ["serve"]
//! language_id = "lean4"
//! file_extensions = ["lean"]
//! ```

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bridge_events::InactiveRead;
use bridge_lsp::{HubConfig, ServerConfig};
use serde::Deserialize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "info";
const DEFAULT_POLL_BUDGET: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub events: EventsConfig,
    /// Language servers keyed by name.
    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Append logs to this file instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            file: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ResourcesConfig {
    #[serde(default)]
    pub inactive_read: InactiveRead,
}

#[derive(Debug, Deserialize)]
pub struct EventsConfig {
    /// Maximum number of server events drained per `poll_events` call.
    #[serde(default = "default_poll_budget")]
    pub poll_budget: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            poll_budget: default_poll_budget(),
        }
    }
}

fn default_filter() -> String {
    DEFAULT_FILTER.to_string()
}

const fn default_poll_budget() -> usize {
    DEFAULT_POLL_BUDGET
}

impl BridgeConfig {
    /// Load `~/.bridge/config.toml`. `Ok(None)` when there is no home
    /// directory or no config file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::from_path(&path).map(Some)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        Self::parse(content)
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Parameters for [`bridge_lsp::StatusHub::new`].
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            servers: self.servers.clone(),
            inactive_read: self.resources.inactive_read,
        }
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".bridge").join("config.toml"))
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.filter`. With `config.file` set
/// the log is appended there without ANSI colours; if the file cannot be
/// opened logging falls back to stderr and the reason is logged once the
/// subscriber is up. A second call is a no-op and opens no file.
pub fn init_tracing(config: &LogConfig) {
    if tracing::dispatcher::has_been_set() {
        tracing::debug!("tracing subscriber already installed");
        return;
    }

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, warning) = match &config.file {
        Some(path) => match open_log_file(path) {
            Ok(file) => (Some(file), None),
            Err(err) => (
                None,
                Some(format!("Failed to open log file {}: {err}", path.display())),
            ),
        },
        None => (None, None),
    };

    let installed = if let Some(file) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(env_filter)
            .try_init()
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
        return;
    }
    if let Some(warning) = warning {
        tracing::warn!("{warning}");
    }
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    File::options().create(true).append(true).open(path)
}
