//! Database Driver Traits and Core Types
//!
//! This module defines the capability interfaces every backend implements.
//! Each built-in backend (`PostgreSQL`, `MySQL`, `SQLite`) lives in its own module
//! behind a cargo feature and implements [`DatabaseDriver`].
//!
//! # Blocking Interface
//! Driver methods are synchronous and may block on the network. The manager never
//! calls them while holding one of its own locks. Async clients drive their futures
//! on a driver-owned tokio runtime (see `runtime`), which is safe to call from async code.
//!
//! # Engine Isolation
//! Each driver implementation is completely independent.
//! No shared SQL helpers or cross-driver abstractions beyond the runtime bridge.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::ConnectionParameters;
use crate::error::{DbcError, Result};

pub mod loader;

#[cfg(any(feature = "postgres", feature = "mysql"))]
mod runtime;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

pub use loader::{DriverLoader, ManifestDriverLoader};

/// Built-in backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// `PostgreSQL` database
    Postgres,
    /// `MySQL` database (includes `MariaDB`)
    MySQL,
    /// `SQLite` database
    SQLite,
}

impl Backend {
    /// Get the backend name as a string (also its registered driver name)
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
        }
    }

    /// All backends, in registration order
    pub const ALL: [Self; 3] = [Self::MySQL, Self::Postgres, Self::SQLite];

    /// Whether the backend was compiled into this build
    #[must_use]
    pub const fn is_available(&self) -> bool {
        match self {
            Self::Postgres => cfg!(feature = "postgres"),
            Self::MySQL => cfg!(feature = "mysql"),
            Self::SQLite => cfg!(feature = "sqlite"),
        }
    }

    /// Instantiate the backend's driver, if it was compiled in
    pub fn instantiate(&self) -> Result<Arc<dyn DatabaseDriver>> {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres => Ok(Arc::new(postgres::PostgresDriver::new()?)),
            #[cfg(feature = "mysql")]
            Self::MySQL => Ok(Arc::new(mysql::MySqlDriver::new()?)),
            #[cfg(feature = "sqlite")]
            Self::SQLite => Ok(Arc::new(sqlite::SqliteDriver::new())),
            #[allow(unreachable_patterns)]
            other => Err(DbcError::driver_not_found(format!(
                "backend '{other}' is not compiled into this build"
            ))),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure reported by a driver while opening or using a connection
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The server rejected the credentials; the manager may retry once with a new password
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The account password has expired and must be changed out of band
    #[error("Password expired: {0}")]
    PasswordExpired(String),

    /// Any other failure
    #[error("{0}")]
    Failed(String),
}

impl DriverError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    #[must_use]
    pub const fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }
}

/// Everything a driver needs to open one physical connection
///
/// `host`/`port` may differ from `params` when a tunnel rewrote the endpoint.
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions<'a> {
    pub params: &'a ConnectionParameters,
    pub host: Option<&'a str>,
    pub port: Option<u16>,
    /// WARNING: Sensitive data, do not log or include in error messages
    pub password: Option<&'a str>,
    /// `None` waits as long as the client library does
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
}

impl<'a> ConnectOptions<'a> {
    /// Options that use the endpoint from `params` unchanged
    #[must_use]
    pub fn direct(params: &'a ConnectionParameters, password: Option<&'a str>) -> Self {
        Self {
            params,
            host: params.host.as_deref(),
            port: params.port,
            password,
            connect_timeout: Some(Duration::from_secs(60)),
            read_timeout: None,
        }
    }
}

/// A live physical connection
pub trait DriverConnection: Send {
    /// Execute a statement, discarding any result rows
    fn execute(&mut self, sql: &str) -> std::result::Result<(), DriverError>;

    /// Server version string, when known
    fn server_version(&self) -> Option<String>;

    /// Server-side connection/session id
    fn connection_id(&mut self) -> Option<i64> {
        None
    }

    /// Cipher negotiated for this connection, if encrypted
    fn ssl_cipher(&mut self) -> Option<String> {
        None
    }

    /// Switch the default schema
    fn set_schema(&mut self, schema: &str) -> std::result::Result<(), DriverError>;

    /// Switch autocommit mode
    fn set_autocommit(&mut self, enabled: bool) -> std::result::Result<(), DriverError>;

    /// Release the connection. Called exactly once, by the last owner.
    fn close(&mut self);
}

/// A database backend implementation
///
/// Implementations are shared across threads and must be callable concurrently.
pub trait DatabaseDriver: Send + Sync {
    /// Name the driver is registered under
    fn name(&self) -> &str;

    /// Version of the underlying client library
    fn client_version(&self) -> String;

    /// Whether opening `params` needs a password at all
    fn requires_password(&self, _params: &ConnectionParameters) -> bool {
        true
    }

    /// Open a physical connection
    fn connect(
        &self,
        options: &ConnectOptions<'_>,
    ) -> std::result::Result<Box<dyn DriverConnection>, DriverError>;

    /// Release resources the driver keeps for the calling thread
    fn thread_cleanup(&self) {}
}

/// Summary of a loaded driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub name: String,
    pub client_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_serialization() {
        assert_eq!(serde_json::to_string(&Backend::Postgres).unwrap(), r#""postgres""#);
        assert_eq!(serde_json::to_string(&Backend::MySQL).unwrap(), r#""mysql""#);
        assert_eq!(serde_json::to_string(&Backend::SQLite).unwrap(), r#""sqlite""#);
        let parsed: Backend = serde_json::from_str(r#""mysql""#).unwrap();
        assert_eq!(parsed, Backend::MySQL);
    }

    #[test]
    fn test_driver_error_kinds() {
        assert!(DriverError::AccessDenied("1045".into()).is_access_denied());
        assert!(!DriverError::PasswordExpired("1820".into()).is_access_denied());
        assert!(!DriverError::failed("timeout").is_access_denied());
    }

    #[test]
    fn test_direct_connect_options() {
        let params = ConnectionParameters::mysql("db", 3306, "root", None);
        let opts = ConnectOptions::direct(&params, Some("pw"));
        assert_eq!(opts.host, Some("db"));
        assert_eq!(opts.port, Some(3306));
        assert_eq!(opts.password, Some("pw"));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_instantiate_sqlite() {
        let driver = Backend::SQLite.instantiate().unwrap();
        assert_eq!(driver.name(), "sqlite");
    }
}
