//! Command line of the provider binary

use clap::{Parser, Subcommand};

use crate::logging::{LogFormat, LoggingConfig};

/// Log level names accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// CAST AI infrastructure-as-code provider
#[derive(Parser, Debug)]
#[command(name = "terraform-provider-castai")]
#[command(about = "CAST AI provider plugin: reconciles declared resources with the CAST AI API")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to run; serves the host protocol when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log output format
    #[arg(long, global = true, env = "CASTAI_LOG_FORMAT", default_value = "json", value_enum)]
    pub log_format: LogFormat,

    /// Log level used when no filter is configured
    #[arg(short = 'l', long, global = true, default_value = "warn", value_enum)]
    pub log_level: LogLevel,

    /// Explicit tracing filter directives
    #[arg(long, global = true, env = "CASTAI_LOG_FILTER")]
    pub log_filter: Option<String>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Serve the JSON-lines host protocol on stdin and stdout
    Serve,
    /// Print the provider and resource schemas as JSON
    Schema,
    /// Show version information
    Version,
}

impl Cli {
    /// The command to run
    #[must_use]
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }

    /// Logging configuration from the flags
    #[must_use]
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            format: self.log_format,
            level: self.log_level.into(),
            filter: self.log_filter.clone(),
        }
    }
}

/// Parse the process arguments
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_is_the_default() {
        temp_env::with_vars([("CASTAI_LOG_FORMAT", None::<&str>), ("CASTAI_LOG_FILTER", None)], || {
            let cli = Cli::try_parse_from(["terraform-provider-castai"]).unwrap();
            assert_eq!(cli.command(), Commands::Serve);
            assert_eq!(cli.logging().format, LogFormat::Json);
            assert_eq!(cli.logging().level, tracing::Level::WARN);
        });
    }

    #[test]
    fn test_flags() {
        temp_env::with_vars([("CASTAI_LOG_FORMAT", None::<&str>), ("CASTAI_LOG_FILTER", None)], || {
            let cli = Cli::try_parse_from([
                "terraform-provider-castai",
                "schema",
                "--log-format",
                "pretty",
                "-l",
                "debug",
            ])
            .unwrap();
            assert_eq!(cli.command(), Commands::Schema);
            assert_eq!(cli.logging().format, LogFormat::Pretty);
            assert_eq!(cli.logging().level, tracing::Level::DEBUG);
        });
    }

    #[test]
    fn test_filter_from_env() {
        temp_env::with_var("CASTAI_LOG_FILTER", Some("castai_engine=trace"), || {
            let cli = Cli::try_parse_from(["terraform-provider-castai", "version"]).unwrap();
            assert_eq!(cli.logging().filter.as_deref(), Some("castai_engine=trace"));
        });
    }
}
