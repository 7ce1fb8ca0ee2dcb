//! Logging configuration and initialization.

use std::env;

use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::{ChronoLocal, ChronoUtc};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable format with colors (default for terminals)
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl LogFormat {
    /// Parse format from string
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Timestamp format for log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    /// Local time with timezone (default)
    #[default]
    Local,
    /// UTC time (ISO 8601)
    Utc,
    /// No timestamps
    None,
}

impl TimestampFormat {
    /// Parse format from string
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "utc" => TimestampFormat::Utc,
            "none" | "off" => TimestampFormat::None,
            _ => TimestampFormat::Local,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output format (pretty, compact)
    pub format: LogFormat,
    /// Timestamp format
    pub timestamps: TimestampFormat,
    /// Default log level filter when RUST_LOG is unset
    pub default_level: String,
    /// Include target (module path)
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            timestamps: TimestampFormat::Local,
            default_level: "info".to_string(),
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    ///
    /// Reads `LOG_FORMAT`, `LOG_TIMESTAMPS` and `LOG_LEVEL` (fallback when
    /// `RUST_LOG` is not set).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(format) = env::var("LOG_FORMAT") {
            config.format = LogFormat::parse(&format);
        }
        if let Ok(ts) = env::var("LOG_TIMESTAMPS") {
            config.timestamps = TimestampFormat::parse(&ts);
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            config.default_level = level;
        }

        config
    }
}

/// Initialize the global tracing subscriber.
///
/// Safe to call more than once; subsequent calls are ignored so tests can
/// initialize logging independently.
pub fn init_logging(config: LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.clone()));

    let result = match (config.format, config.timestamps) {
        (LogFormat::Pretty, TimestampFormat::Local) => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_timer(ChronoLocal::rfc_3339())
                    .with_target(config.include_target),
            )
            .try_init(),
        (LogFormat::Pretty, TimestampFormat::Utc) => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_target(config.include_target),
            )
            .try_init(),
        (LogFormat::Pretty, TimestampFormat::None) => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .without_time()
                    .with_target(config.include_target),
            )
            .try_init(),
        (LogFormat::Compact, TimestampFormat::Local) => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_timer(ChronoLocal::rfc_3339())
                    .with_target(config.include_target),
            )
            .try_init(),
        (LogFormat::Compact, TimestampFormat::Utc) => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_target(config.include_target),
            )
            .try_init(),
        (LogFormat::Compact, TimestampFormat::None) => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .compact()
                    .without_time()
                    .with_target(config.include_target),
            )
            .try_init(),
    };

    // Already initialized (tests, embedded usage) - keep the existing one.
    let _ = result;
}
