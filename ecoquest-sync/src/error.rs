//! Error types for query and mutation execution
//!
//! One settled fetch is handed to every de-duplicated waiter, so
//! [`QueryError`] is `Clone`. The variants follow the remote-service error
//! taxonomy: transport failures, structured HTTP errors and the local
//! failure modes of the cache itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Main error type for query and mutation operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Transport error - the request never reached the service or no response came back
    #[error("Transport error: {0}")]
    Transport(String),

    /// The service answered with a 4xx/5xx status and a structured body
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        errors: Option<BTreeMap<String, Vec<String>>>,
    },

    /// Payload failed validation at the service boundary
    #[error("Decode error: {0}")]
    Decode(String),

    /// Cached data was read back with a different type than it was stored with
    #[error("Type mismatch for query {key}: expected {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    /// Query is gated off (`enabled = false`)
    #[error("Query {0} is disabled")]
    Disabled(String),

    /// In-flight fetch was cancelled before it settled
    #[error("Fetch cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for query operations
pub type Result<T> = std::result::Result<T, QueryError>;

impl QueryError {
    /// Build an HTTP error without field-level details
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        QueryError::Http {
            status,
            message: message.into(),
            errors: None,
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            QueryError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check for a specific HTTP status
    pub fn is_status(&self, code: u16) -> bool {
        self.status() == Some(code)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, QueryError::Transport(_))
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(400..=499))
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(500..=599))
    }

    /// Whether the error class is worth another attempt at all.
    ///
    /// Decoding, typing, gating and cancellation are deterministic and never
    /// retried; transport and HTTP failures are left to the retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueryError::Transport(_) | QueryError::Http { .. } | QueryError::Other(_)
        )
    }

    /// Field-level validation errors returned by the service
    pub fn field_errors(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        match self {
            QueryError::Http { errors, .. } => errors.as_ref(),
            _ => None,
        }
    }
}

impl From<String> for QueryError {
    fn from(s: String) -> Self {
        QueryError::Other(s)
    }
}

impl From<&str> for QueryError {
    fn from(s: &str) -> Self {
        QueryError::Other(s.to_string())
    }
}

/// Structured error body returned by the remote service
///
/// `{ "message": "...", "status": 409, "errors": { "field": ["..."] } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
}

impl ApiErrorBody {
    /// Decode an error body, falling back to the raw text when it is not JSON
    pub fn parse(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<ApiErrorBody>(body) {
            Ok(mut parsed) => {
                if parsed.status.is_none() {
                    parsed.status = Some(status);
                }
                if parsed.message.is_empty() {
                    parsed.message = format!("request failed with status {}", status);
                }
                parsed
            }
            Err(_) => {
                let text = String::from_utf8_lossy(body).trim().to_string();
                ApiErrorBody {
                    message: if text.is_empty() {
                        format!("request failed with status {}", status)
                    } else {
                        text
                    },
                    status: Some(status),
                    errors: None,
                }
            }
        }
    }

    /// Convert into a [`QueryError::Http`], preferring the transport status
    pub fn into_error(self, transport_status: u16) -> QueryError {
        QueryError::Http {
            status: transport_status,
            message: self.message,
            errors: self.errors,
        }
    }
}
