//! Tracing setup for the watchdog binary: a compact stdout layer filtered
//! by `RUST_LOG` (or an explicit default level), plus an optional
//! newline-JSON file layer via `tracing-appender`'s non-blocking writer.
//! Mirrors the teacher CLI's `util::logging` module, minus the
//! `indicatif` progress-bar integration this binary has no use for.

use std::fs::File;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// The watchdog's configured log verbosity, also accepted as a `clap`
/// flag value and a `figment`-loaded config/env setting.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum,
)]
#[clap(rename_all = "lower")]
#[serde(rename_all = "UPPERCASE")]
pub enum LevelFilter {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LevelFilter {
    fn into_tracing(self) -> tracing::level_filters::LevelFilter {
        match self {
            LevelFilter::Off => tracing::level_filters::LevelFilter::OFF,
            LevelFilter::Error => tracing::level_filters::LevelFilter::ERROR,
            LevelFilter::Warn => tracing::level_filters::LevelFilter::WARN,
            LevelFilter::Info => tracing::level_filters::LevelFilter::INFO,
            LevelFilter::Debug => tracing::level_filters::LevelFilter::DEBUG,
            LevelFilter::Trace => tracing::level_filters::LevelFilter::TRACE,
        }
    }
}

/// Keeps the non-blocking file appender alive for the life of the process;
/// dropping it flushes any buffered log lines.
pub struct FileLoggerGuard(#[allow(dead_code)] WorkerGuard);

/// Install the global tracing subscriber. `default` sets the stdout
/// filter's base level (overridden by `RUST_LOG` if `default` is `None`);
/// `log_file`, if given, also gets every event as newline-delimited JSON.
pub fn setup_logging(
    default: LevelFilter,
    log_file: Option<&Path>,
) -> anyhow::Result<Option<FileLoggerGuard>> {
    let stdout_layer = tracing_subscriber::fmt::layer().compact().with_filter(
        EnvFilter::builder()
            .with_default_directive(default.into_tracing().into())
            .from_env_lossy(),
    );

    let Some(log_file) = log_file else {
        tracing_subscriber::registry().with(stdout_layer).init();
        return Ok(None);
    };

    let file = File::create(log_file)?;
    let (appender, guard) = tracing_appender::non_blocking(file);
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_file(true)
        .with_line_number(true)
        .with_writer(appender);

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(Some(FileLoggerGuard(guard)))
}
