//! Error type definitions for the exporter
//!
//! Each layer owns its error enum: the Event Socket client, the scrape
//! pipeline, the metrics sink and configuration loading. Only the binary
//! collapses them into `anyhow::Error`.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the Event Socket client
#[derive(Error, Debug)]
pub enum EslError {
    /// The server rejected the password. Never retried.
    #[error("ESL authentication rejected by {addr}: {reply}")]
    Auth { addr: String, reply: String },

    /// Socket-level failure (connect, read, write, unexpected EOF)
    #[error("ESL transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Connection establishment did not finish in time
    #[error("Failed to connect to ESL within {timeout:?}")]
    ConnectionTimeout { timeout: Duration },

    /// A command was issued while no connection is available
    #[error("ESL client is disconnected, unable to execute {command}")]
    NotConnected { command: String },

    /// The server answered a command with an error marker
    #[error("ESL command {command} failed: {reply}")]
    Command { command: String, reply: String },

    /// The server sent something the client does not understand
    #[error("ESL protocol error: {message}")]
    Protocol { message: String },

    /// The client configuration is unusable
    #[error("Invalid ESL configuration: {field} - {message}")]
    InvalidConfig { field: String, message: String },
}

/// Failures inside a single scrape pass
///
/// These never leave the orchestrator; they are recorded in the scrape
/// report and logged.
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// `show channels` could not be executed
    #[error("channel listing failed: {0}")]
    Listing(#[source] EslError),

    /// `show channels` answered with something that is not a channel table
    #[error("channel listing is not valid JSON: {0}")]
    ListingParse(#[source] serde_json::Error),

    /// `mediaStats` could not be executed
    #[error("mediaStats failed: {0}")]
    Stats(#[source] EslError),

    /// `mediaStats` answered with an unexpected payload
    #[error("mediaStats reply is malformed: {message}")]
    StatsParse { message: String },
}

/// Errors raised by the metrics sink
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Registration or encoding failed inside the prometheus registry
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// Encoded exposition is not valid UTF-8
    #[error("Metrics exposition is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Layered extraction (file + environment) failed
    #[error("Configuration error: {0}")]
    Extract(#[from] Box<figment::Error>),

    /// A duration string could not be parsed
    #[error("Invalid duration for {field}: {message}")]
    InvalidDuration { field: String, message: String },
}

impl EslError {
    /// Create a protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn invalid_config<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a not-connected error for the given command
    pub fn not_connected<S: Into<String>>(command: S) -> Self {
        Self::NotConnected {
            command: command.into(),
        }
    }

    /// Whether the supervisor should keep retrying after this error
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Auth { .. } | Self::InvalidConfig { .. })
    }
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        Self::Extract(Box::new(error))
    }
}
