//! Tracing configuration for the provider binary
//!
//! stdout carries the host protocol, so every format writes to stderr.
//! The filter comes from `--log-filter`, then `RUST_LOG`, then the host's
//! `TF_LOG` level.

use std::io;

pub use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Environment variable the host uses for its own log level.
pub const TF_LOG_ENV: &str = "TF_LOG";

/// Tracing output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Compact single-line format
    Compact,
    /// Structured JSON format
    Json,
    /// Pretty-printed human-readable format
    Pretty,
}

/// Tracing configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Level used when neither `RUST_LOG` nor `TF_LOG` is set
    pub level: Level,
    /// Explicit filter directives
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: Level::WARN,
            filter: None,
        }
    }
}

/// Parses a `TF_LOG` value. `JSON` is the host's alias for trace output.
#[must_use]
pub fn level_from_tf_log(value: &str) -> Option<Level> {
    match value.trim().to_ascii_uppercase().as_str() {
        "TRACE" | "JSON" => Some(Level::TRACE),
        "DEBUG" => Some(Level::DEBUG),
        "INFO" => Some(Level::INFO),
        "WARN" => Some(Level::WARN),
        "ERROR" => Some(Level::ERROR),
        _ => None,
    }
}

/// Directive string enabling the provider crates at `level`.
#[must_use]
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    format!("castai_provider={level},castai_engine={level},castai::provider={level}")
}

static SESSION_ID: std::sync::OnceLock<Uuid> = std::sync::OnceLock::new();

/// Correlation id of this provider process
pub fn session_id() -> Uuid {
    *SESSION_ID.get_or_init(Uuid::new_v4)
}

fn build_filter(config: &LoggingConfig) -> miette::Result<EnvFilter> {
    if let Some(filter) = &config.filter {
        return EnvFilter::try_new(filter)
            .map_err(|e| miette::miette!("Failed to create tracing filter: {e}"));
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = std::env::var(TF_LOG_ENV)
        .ok()
        .and_then(|value| level_from_tf_log(&value))
        .unwrap_or(config.level);
    EnvFilter::try_new(default_directives(level))
        .map_err(|e| miette::miette!("Failed to create tracing filter: {e}"))
}

/// Initialize tracing with the given configuration
///
/// # Errors
///
/// Returns an error when the filter does not parse.
pub fn init_logging(config: &LoggingConfig) -> miette::Result<()> {
    let registry = tracing_subscriber::registry().with(build_filter(config)?);

    match config.format {
        LogFormat::Compact => {
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(io::stderr)
                .with_target(true)
                .with_ansi(false);
            registry.with(layer).init();
        }
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_current_span(true)
                .with_span_list(true);
            registry.with(layer).init();
        }
        LogFormat::Pretty => {
            let layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(io::stderr)
                .with_target(true);
            registry.with(layer).init();
        }
    }

    tracing::info!(
        session_id = %session_id(),
        version = env!("CARGO_PKG_VERSION"),
        format = ?config.format,
        "Tracing initialized for the CAST AI provider"
    );

    Ok(())
}
