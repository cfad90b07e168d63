//! Centralized error handling for the exporter
//!
//! # Error Categories
//!
//! - **ESL Errors**: Event Socket connection, authentication and commands
//! - **Scrape Errors**: per-pass listing and per-channel failures
//! - **Metrics Errors**: registry and exposition encoding
//! - **Config Errors**: file/environment layering

pub mod types;

pub use types::*;

/// Convenience type alias for Event Socket results
pub type EslResult<T> = Result<T, EslError>;

/// Convenience type alias for metrics sink results
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Convenience type alias for configuration results
pub type ConfigResult<T> = Result<T, ConfigError>;
