//! JSON Output Envelope Types
//!
//! This module defines the structured JSON output format of the `cdbc` command line.
//! Every command prints exactly one envelope on stdout.
//!
//! # Output Contract
//! - Success: `{"ok": true, "driver": "...", "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "driver": "...", "command": "...", "error": {"code": "...", "message": "..."}}`

use serde::{Deserialize, Serialize};

use crate::error::DbcError;

/// Success envelope for command results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Driver involved (empty string if not driver-specific)
    pub driver: String,

    /// Command that was executed (connect, add, list, drivers)
    pub command: String,

    /// Command-specific data
    pub data: T,

    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(driver: impl Into<String>, command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, driver: driver.into(), command: command.into(), data, meta }
    }
}

/// Error envelope for command failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    /// Driver involved (empty string if not driver-specific)
    pub driver: String,

    pub command: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(driver: impl Into<String>, command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, driver: driver.into(), command: command.into(), error }
    }

    /// Create error envelope from `DbcError`
    pub fn from_error(driver: impl Into<String>, command: impl Into<String>, err: &DbcError) -> Self {
        Self::new(driver, command, ErrorInfo::new(err.error_code(), err.message()))
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "DRIVER_NOT_FOUND", "AUTHENTICATION_FAILED")
    pub code: String,

    /// Human-readable error message (never contains a password)
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Execution time in milliseconds
    pub execution_ms: u64,
}

impl Metadata {
    #[must_use]
    pub const fn new(execution_ms: u64) -> Self {
        Self { execution_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authentication;
    use crate::connection::ConnectionParameters;

    #[test]
    fn test_success_envelope_serialization() {
        let envelope = SuccessEnvelope::new(
            "mysql",
            "connect",
            serde_json::json!({"server_version": "8.0.36"}),
            Metadata::new(42),
        );

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""ok":true"#));
        assert!(json.contains(r#""driver":"mysql""#));
        assert!(json.contains(r#""command":"connect""#));
        assert!(json.contains(r#""execution_ms":42"#));
    }

    #[test]
    fn test_error_envelope_serialization() {
        let envelope = ErrorEnvelope::new(
            "postgres",
            "connect",
            ErrorInfo::new("CONNECTION_FAILED", "Could not connect to database"),
        );

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""ok":false"#));
        assert!(json.contains(r#""driver":"postgres""#));
        assert!(json.contains(r#""code":"CONNECTION_FAILED""#));
        assert!(json.contains(r#""message":"Could not connect to database""#));
    }

    #[test]
    fn test_error_envelope_from_error() {
        let err = DbcError::driver_not_found("oracle");
        let envelope = ErrorEnvelope::from_error("oracle", "connect", &err);

        assert!(!envelope.ok);
        assert_eq!(envelope.driver, "oracle");
        assert_eq!(envelope.error.code, "DRIVER_NOT_FOUND");
        assert!(envelope.error.message.contains("oracle"));
    }

    #[test]
    fn test_authentication_error_envelope_has_no_password() {
        let auth = Authentication::create(&ConnectionParameters::mysql("db", 3306, "root", None), "");
        auth.set_password("top-secret");
        let err = DbcError::authentication_error("Access denied for user 'root'", auth);
        let json = serde_json::to_string(&ErrorEnvelope::from_error("mysql", "connect", &err)).unwrap();

        assert!(json.contains("AUTHENTICATION_FAILED"));
        assert!(!json.contains("top-secret"));
    }
}
