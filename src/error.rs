//! Error Handling Infrastructure
//!
//! This module defines all error types returned by the connection core.
//! Every error maps to a stable error code for JSON output.
//!
//! # Error Categories
//! - `DriverNotFound`: unknown or unloadable driver name (never retried)
//! - `TunnelError`: tunnel failed to establish (never retried)
//! - `AuthenticationError`: credentials rejected after the single retry
//! - `ConnectionSetupError`: the post-open init callback failed
//! - `ConnectionFailed`: any other open failure (never retried)
//! - `Cancelled`, `ConnectionReset`, `QueryFailed`, `QueryCancelled`,
//!   `InvalidInput`, `ConfigError`, `InvalidState`: supporting failures

use std::sync::Arc;

use thiserror::Error;

use crate::auth::Authentication;

/// Main error type for connection management
#[derive(Error, Debug)]
pub enum DbcError {
    /// The driver name is neither registered nor discoverable
    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    /// The tunnel could not be established
    #[error("Tunnel error: {0}")]
    TunnelError(String),

    /// Credentials were rejected; carries the authentication state of the last attempt
    #[error("Authentication failed: {message}")]
    AuthenticationError { message: String, auth: Arc<Authentication> },

    /// The connection opened but the init callback failed (connection already closed)
    #[error("Connection setup failed: {0}")]
    ConnectionSetupError(String),

    /// Any other failure while opening the connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The user dismissed a password prompt
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The wrapper's connection handle was released with `reset()`
    #[error("Connection has been released")]
    ConnectionReset,

    /// A statement failed on an open connection
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Execution stopped because a stop was requested for the session
    #[error("Query cancelled after {executed} statement(s)")]
    QueryCancelled { executed: usize },

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Illegal state machine transition
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },
}

impl DbcError {
    /// Convert error to error code string for JSON output
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::DriverNotFound(_) => "DRIVER_NOT_FOUND",
            Self::TunnelError(_) => "TUNNEL_ERROR",
            Self::AuthenticationError { .. } => "AUTHENTICATION_FAILED",
            Self::ConnectionSetupError(_) => "CONNECTION_SETUP_FAILED",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::Cancelled(_) => "CANCELLED",
            Self::ConnectionReset => "CONNECTION_RESET",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::QueryCancelled { .. } => "QUERY_CANCELLED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::InvalidState { .. } => "INVALID_STATE",
        }
    }

    /// Get human-readable error message
    ///
    /// Never contains a password: `Authentication` is only rendered through its redacting `Debug`.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// The authentication object attached to an `AuthenticationError`
    #[must_use]
    pub fn authentication(&self) -> Option<&Arc<Authentication>> {
        match self {
            Self::AuthenticationError { auth, .. } => Some(auth),
            _ => None,
        }
    }

    pub fn driver_not_found(name: impl Into<String>) -> Self {
        Self::DriverNotFound(name.into())
    }

    pub fn tunnel_error(message: impl Into<String>) -> Self {
        Self::TunnelError(message.into())
    }

    pub fn authentication_error(message: impl Into<String>, auth: Arc<Authentication>) -> Self {
        Self::AuthenticationError { message: message.into(), auth }
    }

    pub fn connection_setup(message: impl Into<String>) -> Self {
        Self::ConnectionSetupError(message.into())
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled(message.into())
    }

    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Re-tag an error raised by a tunnel implementation as a `TunnelError`
    ///
    /// Tunnel implementations may return any variant; the caller only needs to know the
    /// tunnel was the failing step, so the diagnostic text is kept and the kind normalized.
    #[must_use]
    pub fn into_tunnel_error(self) -> Self {
        match self {
            Self::TunnelError(_) => self,
            Self::InvalidInput(msg)
            | Self::ConnectionFailed(msg)
            | Self::ConfigError(msg)
            | Self::Cancelled(msg) => Self::TunnelError(msg),
            other => Self::TunnelError(other.to_string()),
        }
    }
}

/// Result type alias for connection operations
pub type Result<T> = std::result::Result<T, DbcError>;
