//! `SQLite` Driver Implementation
//!
//! This module implements the `DatabaseDriver` trait for `SQLite` databases.
//!
//! # Features
//! - File-based connections (`/path/to/db.sqlite`)
//! - In-memory connections (`:memory:`)
//! - Read-only opening via the `read_only=true` driver option
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver, no async needed)
//! - No password: `requires_password` is always false
//! - Busy timeout follows the configured connect timeout
//! - Autocommit off is emulated with an explicit `BEGIN`

use rusqlite::{Connection, OpenFlags};

use crate::connection::ConnectionParameters;
use crate::engine::{ConnectOptions, DatabaseDriver, DriverConnection, DriverError};

/// `SQLite` driver
#[derive(Debug, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DatabaseDriver for SqliteDriver {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn client_version(&self) -> String {
        format!("SQLite {}", rusqlite::version())
    }

    fn requires_password(&self, _params: &ConnectionParameters) -> bool {
        false
    }

    fn connect(
        &self,
        options: &ConnectOptions<'_>,
    ) -> std::result::Result<Box<dyn DriverConnection>, DriverError> {
        let file = options
            .params
            .file
            .as_ref()
            .ok_or_else(|| DriverError::failed("SQLite requires 'file' parameter"))?;

        let path_str = file
            .to_str()
            .ok_or_else(|| DriverError::failed("SQLite file path contains invalid UTF-8 characters"))?;

        let read_only = options.params.options.get("read_only").is_some_and(|v| v == "true");
        let conn = open_connection(path_str, read_only)?;
        if let Some(timeout) = options.connect_timeout {
            conn.busy_timeout(timeout)
                .map_err(|e| DriverError::failed(format!("Failed to set busy timeout: {e}")))?;
        }

        tracing::debug!(file = path_str, read_only, "opened SQLite database");
        Ok(Box::new(SqliteConnection { conn: Some(conn) }))
    }
}

/// Open a `SQLite` connection with appropriate flags
fn open_connection(path: &str, read_only: bool) -> std::result::Result<Connection, DriverError> {
    let flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
    };

    Connection::open_with_flags(path, flags)
        .map_err(|e| DriverError::failed(format!("Failed to open SQLite database: {e}")))
}

struct SqliteConnection {
    conn: Option<Connection>,
}

impl SqliteConnection {
    fn conn(&self) -> std::result::Result<&Connection, DriverError> {
        self.conn.as_ref().ok_or_else(|| DriverError::failed("SQLite connection is closed"))
    }
}

impl DriverConnection for SqliteConnection {
    fn execute(&mut self, sql: &str) -> std::result::Result<(), DriverError> {
        self.conn()?
            .execute_batch(sql)
            .map_err(|e| DriverError::failed(format!("SQLite error: {e}")))
    }

    fn server_version(&self) -> Option<String> {
        Some(rusqlite::version().to_string())
    }

    fn set_schema(&mut self, schema: &str) -> std::result::Result<(), DriverError> {
        // Attached databases are addressed by prefix, there is no default-schema switch
        if schema == "main" {
            Ok(())
        } else {
            Err(DriverError::failed(format!("SQLite cannot switch default schema to '{schema}'")))
        }
    }

    fn set_autocommit(&mut self, enabled: bool) -> std::result::Result<(), DriverError> {
        let conn = self.conn()?;
        let sql = match (enabled, conn.is_autocommit()) {
            (true, false) => "COMMIT",
            (false, true) => "BEGIN",
            _ => return Ok(()),
        };
        conn.execute_batch(sql).map_err(|e| DriverError::failed(format!("SQLite error: {e}")))
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!("failed to close SQLite connection: {e}");
            }
        }
    }
}

/// Check that a parameter set targets an in-memory database
#[must_use]
pub fn is_memory(params: &ConnectionParameters) -> bool {
    params.file.as_deref().is_some_and(|f| f.as_os_str() == ":memory:")
}

/// Convenience for tests and tooling: parameters for an in-memory database
#[must_use]
pub fn memory_params() -> ConnectionParameters {
    ConnectionParameters::sqlite(":memory:")
}
