//! Standardized logging configuration for the engine.
//!
//! Provides consistent log output across the backtest pipeline.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: standard tracing filter (e.g. `info`, `backtest_core=debug`)
//! - `LOG_FORMAT`: output format - `pretty` (default) or `compact`
//! - `LOG_TIMESTAMPS`: timestamp format - `local` (default), `utc`, or `none`
//!
//! # Usage
//!
//! ```rust,ignore
//! use backtest_core::logging::{init_logging, LogConfig};
//!
//! init_logging(LogConfig::from_env());
//! ```

mod config;

pub use config::{init_logging, LogConfig, LogFormat, TimestampFormat};
