//! Startup configuration.
//!
//! Precedence per value: CLI flag / environment > `<data_dir>/config.toml` >
//! built-in default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use crate::actor::{Timings, DEFAULT_STATUS_DISMISS};
use crate::logging::{LogFormat, LogSettings, DEFAULT_LOG_FILE};
use crate::paths::DataDir;
use crate::saves::DEFAULT_SAVE_DEBOUNCE;
use crate::socket::{ReconnectPolicy, DEFAULT_RECONNECT_DELAY};

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000";
pub const DEFAULT_LOCATION: &str = "http://localhost:5173/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHomeDir,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid location URL: {0}")]
    InvalidLocation(#[from] url::ParseError),
}

#[derive(Debug, Parser)]
#[command(name = "analyst")]
#[command(about = "Terminal client for the requirements analyst assistant")]
#[command(version)]
pub struct Cli {
    /// Server base URL (ws:// or wss://)
    #[arg(long, env = "ANALYST_SERVER_URL")]
    pub server: Option<String>,

    /// Directory for the client database, logs and config.toml
    #[arg(long, env = "ANALYST_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Page URL to start from; a `session_id` query parameter resumes that session
    #[arg(long)]
    pub location: Option<String>,

    /// Delay between reconnect attempts
    #[arg(long, env = "ANALYST_RECONNECT_MS")]
    pub reconnect_ms: Option<u64>,

    /// Quiet period before an artifact edit is sent
    #[arg(long)]
    pub save_debounce_ms: Option<u64>,

    /// How long success/error statuses stay visible
    #[arg(long)]
    pub status_dismiss_ms: Option<u64>,

    /// Tracing filter directive for the log file
    #[arg(long, env = "ANALYST_LOG_FILTER")]
    pub log_filter: Option<String>,

    #[arg(long, value_enum, env = "ANALYST_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

/// `config.toml` contents. Every key is optional.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: Option<String>,
    pub location: Option<String>,
    pub reconnect_ms: Option<u64>,
    /// Growth factor per failed attempt; absent or 1.0 keeps the delay fixed
    pub reconnect_multiplier: Option<f64>,
    pub reconnect_max_ms: Option<u64>,
    pub save_debounce_ms: Option<u64>,
    pub status_dismiss_ms: Option<u64>,
    /// File name inside `<data_dir>/logs`
    pub log_file: Option<String>,
    pub log_format: Option<LogFormat>,
    pub log_filter: Option<String>,
    pub truncate_log_on_start: bool,
}

impl FileConfig {
    /// A missing file is an empty config
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub data_dir: DataDir,
    pub location: String,
    pub timings: Timings,
    pub logging: LogSettings,
}

impl ClientConfig {
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
        let file = FileConfig::load(&data_dir.config_path())?;
        Self::merge(cli, file, data_dir)
    }

    pub fn merge(cli: &Cli, file: FileConfig, data_dir: DataDir) -> Result<Self, ConfigError> {
        let location = cli
            .location
            .clone()
            .or(file.location)
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string());
        url::Url::parse(&location)?;

        let delay = cli
            .reconnect_ms
            .or(file.reconnect_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RECONNECT_DELAY);
        let reconnect = match file.reconnect_multiplier.filter(|m| *m > 1.0) {
            Some(multiplier) => ReconnectPolicy::exponential(
                delay,
                multiplier,
                file.reconnect_max_ms
                    .map(Duration::from_millis)
                    .unwrap_or(delay * 10),
            ),
            None => ReconnectPolicy::fixed(delay),
        };

        let logging = LogSettings {
            dir: data_dir.log_dir(),
            file_name: file
                .log_file
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string()),
            format: cli.log_format.or(file.log_format).unwrap_or_default(),
            filter: cli.log_filter.clone().or(file.log_filter),
            truncate_on_start: file.truncate_log_on_start,
        };

        Ok(Self {
            server_url: cli
                .server
                .clone()
                .or(file.server)
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            data_dir,
            location,
            timings: Timings {
                reconnect,
                save_debounce: cli
                    .save_debounce_ms
                    .or(file.save_debounce_ms)
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_SAVE_DEBOUNCE),
                status_dismiss: cli
                    .status_dismiss_ms
                    .or(file.status_dismiss_ms)
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_STATUS_DISMISS),
            },
            logging,
        })
    }
}
