//! WolfBlock Error Types

use thiserror::Error;

/// Result type alias for WolfBlock operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfBlock error types
#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors (surfaced to the caller, never retried internally)
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Stale revision for {address}: stored {stored}, incoming {incoming}")]
    StaleRevision {
        address: String,
        stored: u64,
        incoming: u64,
    },

    #[error("No outstanding rebuild ticket for {0}")]
    NoOutstandingTicket(String),

    #[error("Volume not quorate: {ready}/{required} quorum replicas ready")]
    NotQuorate { ready: usize, required: usize },

    /// Ticket expiry. Only ever recorded as a failure reason, never returned from a call.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Request body or parameters that could not be understood
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Catalog errors
    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Controller returned {status}: {message}")]
    Api { status: u16, message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error was caused by the caller's request
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::Conflict(_)
                | Error::StaleRevision { .. }
                | Error::NoOutstandingTicket(_)
                | Error::NotQuorate { .. }
        )
    }

    /// Stable code used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::Conflict(_) => "CONFLICT",
            Error::StaleRevision { .. } => "STALE_REVISION",
            Error::NoOutstandingTicket(_) => "NO_OUTSTANDING_TICKET",
            Error::NotQuorate { .. } => "NOT_QUORATE",
            Error::Timeout(_) => "TIMEOUT",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG",
            Error::Catalog(_) => "CATALOG",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Network(_) => "NETWORK",
            Error::Api { .. } => "API",
            Error::Io(_) => "IO",
            Error::Internal(_) => "INTERNAL",
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Catalog(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}
