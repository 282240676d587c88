use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use serde::Deserialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info,tungstenite=warn,tokio_tungstenite=warn";
pub const DEFAULT_LOG_FILE: &str = "client.log";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Where and how the client writes its log, resolved from flags,
/// environment and `config.toml`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub dir: PathBuf,
    pub file_name: String,
    pub format: LogFormat,
    /// Filter directive; `RUST_LOG` and then [`DEFAULT_FILTER`] apply when unset
    pub filter: Option<String>,
    pub truncate_on_start: bool,
}

impl LogSettings {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

pub struct LoggingHandle {
    pub run_id: String,
    pub guard: WorkerGuard,
}

/// Pick the filter directive: configured, then `RUST_LOG`, then the default.
/// Directives that do not parse are skipped.
fn filter_directive(configured: Option<&str>, rust_log: Option<String>) -> String {
    configured
        .map(str::to_string)
        .into_iter()
        .chain(rust_log)
        .find(|directive| EnvFilter::try_new(directive).is_ok())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Route all tracing output to the log file. The terminal stays free for
/// the conversation.
pub fn init_logging(settings: &LogSettings) -> anyhow::Result<LoggingHandle> {
    std::fs::create_dir_all(&settings.dir)?;
    let log_path = settings.path();

    if settings.truncate_on_start {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&log_path)?;
    }

    let directive = filter_directive(
        settings.filter.as_deref(),
        std::env::var("RUST_LOG").ok(),
    );
    let filter = EnvFilter::try_new(&directive)?;

    let file_appender = tracing_appender::rolling::never(&settings.dir, &settings.file_name);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let registry = tracing_subscriber::registry().with(filter);
    match settings.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .try_init()?,
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let run_id = format!("pid-{}-{}", std::process::id(), now);

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        run_id = %run_id,
        log_path = %log_path.display(),
        format = ?settings.format,
        filter = %directive,
    );

    Ok(LoggingHandle { run_id, guard })
}
