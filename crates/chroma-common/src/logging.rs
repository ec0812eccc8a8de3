//! ---
//! chroma_section: "01-core-functionality"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Shared primitives and utilities for the control client."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "CHROMA_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Writer guards of the installed subscriber, file first.
static WRITER_GUARDS: OnceCell<[WorkerGuard; 2]> = OnceCell::new();

/// Stdout rendering. The rolling file is JSON whatever this says.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// Install the process-wide subscriber.
///
/// Events go to stdout in `config.format` and to a daily JSON file named
/// after `config.file_prefix` (or `service_name`) under `config.directory`.
/// The filter is read from `CHROMA_LOG`, then `RUST_LOG`. A second call
/// leaves the first subscriber in place.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(daily(&config.directory, format!("{prefix}.log")));
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = WRITER_GUARDS.set([file_guard, stdout_guard]);

    let timer = || fmt::time::UtcTime::rfc_3339();
    let console = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_timer(timer())
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::StructuredJson => fmt::layer()
            .json()
            .with_target(false)
            .with_timer(timer())
            .with_writer(stdout_writer)
            .boxed(),
    };
    let file = fmt::layer()
        .json()
        .with_timer(timer())
        .with_writer(file_writer)
        .boxed();

    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(console)
        .with(file)
        .try_init()
        .is_ok();
    info!(
        service = %service_name,
        directory = %config.directory.display(),
        format = ?config.format,
        installed,
        "logging ready"
    );
    Ok(())
}

fn env_filter() -> EnvFilter {
    if let Ok(directive) = std::env::var(LOG_ENV) {
        match EnvFilter::try_new(&directive) {
            Ok(filter) => return filter,
            Err(err) => eprintln!("ignoring {LOG_ENV}={directive}: {err}"),
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_uses_kebab_case() {
        let format: LogFormat = serde_json::from_str("\"structured-json\"").expect("parses");
        assert_eq!(format, LogFormat::StructuredJson);
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }

    #[test]
    fn init_creates_log_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = LoggingConfig {
            directory: dir.path().join("logs"),
            format: LogFormat::StructuredJson,
            file_prefix: Some("chroma-test".into()),
        };
        init_tracing("chroma-test", &config).expect("init succeeds");
        assert!(config.directory.is_dir());
    }
}
