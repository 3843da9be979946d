//! ---
//! rmon_section: "01-core-functionality"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Tracing subscriber bootstrap for harness binaries."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Registry;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "RMON_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Flush guards for the non-blocking writers; dropping them loses buffered lines.
static GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Console log formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// Filter from `RMON_LOG`, then `RUST_LOG`, then `info`. An unparsable
/// `RMON_LOG` is reported once the subscriber is up.
fn env_filter() -> (EnvFilter, Option<String>) {
    match std::env::var(LOG_ENV) {
        Ok(directive) => match EnvFilter::try_new(&directive) {
            Ok(filter) => (filter, None),
            Err(err) => (
                EnvFilter::new(DEFAULT_DIRECTIVE),
                Some(format!("invalid {LOG_ENV} directive '{directive}': {err}")),
            ),
        },
        Err(_) => (
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE)),
            None,
        ),
    }
}

fn console_layer(format: LogFormat, writer: NonBlocking) -> BoxedLayer {
    let layer = fmt::layer()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(writer);
    match format {
        LogFormat::StructuredJson => layer.json().with_target(false).boxed(),
        LogFormat::Pretty => layer.with_target(true).boxed(),
    }
}

fn file_layer(writer: NonBlocking) -> BoxedLayer {
    fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_writer(writer)
        .boxed()
}

/// Install the global subscriber: a console layer in [`LoggingConfig::format`]
/// plus a daily-rolling JSON file `<prefix>.log.<date>` under
/// [`LoggingConfig::directory`]. The prefix defaults to `service_name`.
///
/// A second call keeps the first subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("unable to create log directory {}", config.directory.display())
    })?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    let file_name = PathBuf::from(format!("{prefix}.log"));

    let (file_writer, file_guard) =
        tracing_appender::non_blocking(rolling::daily(&config.directory, &file_name));
    let (console_writer, console_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = GUARDS.set(vec![file_guard, console_guard]);

    let (filter, filter_problem) = env_filter();
    let layers = vec![console_layer(config.format, console_writer), file_layer(file_writer)];
    let installed = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .is_ok();

    if let Some(problem) = filter_problem {
        warn!("{problem}; using {DEFAULT_DIRECTIVE}");
    }
    info!(
        service = service_name,
        log_dir = %config.directory.display(),
        log_file = %file_name.display(),
        format = ?config.format,
        installed,
        "tracing initialised"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_uses_kebab_case() {
        let json = serde_json::to_string(&LogFormat::StructuredJson).unwrap();
        assert_eq!(json, "\"structured-json\"");
        let parsed: LogFormat = serde_json::from_str("\"pretty\"").unwrap();
        assert_eq!(parsed, LogFormat::Pretty);
    }

    #[test]
    fn init_creates_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            directory: dir.path().join("logs"),
            format: LogFormat::Pretty,
            file_prefix: Some("rmon-test".into()),
        };
        init_tracing("rmon-test", &config).unwrap();
        assert!(config.directory.is_dir());
    }
}
