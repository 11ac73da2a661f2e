//! Error types for route-guard

use std::io;

use thiserror::Error;

/// Result type alias for route-guard
pub type Result<T> = std::result::Result<T, Error>;

/// route-guard errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stored record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A stored record exists but cannot be decoded
    #[error("Decode error for {key}: {source}")]
    Decode {
        /// Store field that held the corrupt value
        key: String,
        /// Underlying JSON error
        source: serde_json::Error,
    },

    /// Key-value store failure (connection, protocol)
    #[error("Store error: {0}")]
    Store(String),

    /// A store or identity provider call did not complete in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Store(e.to_string())
        }
    }
}

impl Error {
    /// Whether this error means the requested record is absent
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether a store or provider call ran out of time
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// HTTP status class used when the error escapes to a request
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Store(_) => 502,
            Self::Http(e) if e.is_timeout() => 504,
            Self::Http(_) => 502,
            Self::Timeout(_) => 504,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_timeout_map_to_gateway_statuses() {
        assert_eq!(Error::Store("down".into()).status_code(), 502);
        assert_eq!(Error::Timeout("slow".into()).status_code(), 504);
        assert_eq!(Error::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn not_found_is_detectable() {
        assert!(Error::NotFound("route r1".into()).is_not_found());
        assert!(!Error::Store("down".into()).is_not_found());
    }
}
