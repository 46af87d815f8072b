//! Shared connection handle
//!
//! A [`ConnectionWrapper`] is cheap to clone. All clones share one physical connection,
//! which is closed exactly once, when the last clone releases it. The tunnel (if any)
//! is released after the connection.

use std::sync::{Arc, Mutex, PoisonError};

use crate::engine::DriverConnection;
use crate::error::{DbcError, Result};
use crate::tunnel::SharedTunnel;

/// Physical connection plus the name of the driver that opened it
struct LiveConnection {
    driver: String,
    inner: Mutex<Box<dyn DriverConnection>>,
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.inner.get_mut().unwrap_or_else(PoisonError::into_inner).close();
        tracing::debug!(driver = %self.driver, "connection closed");
    }
}

/// Shared owner of an open connection and its tunnel
#[derive(Clone, Default)]
pub struct ConnectionWrapper {
    // Field order matters: the connection must close before the tunnel goes away
    conn: Option<Arc<LiveConnection>>,
    tunnel: Option<Arc<SharedTunnel>>,
}

impl ConnectionWrapper {
    /// Take ownership of a freshly opened connection
    pub fn new(
        driver: impl Into<String>,
        conn: Box<dyn DriverConnection>,
        tunnel: Option<Arc<SharedTunnel>>,
    ) -> Self {
        let live = LiveConnection { driver: driver.into(), inner: Mutex::new(conn) };
        Self { conn: Some(Arc::new(live)), tunnel }
    }

    /// Whether this wrapper still holds its connection handle
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Release this owner's connection handle now
    ///
    /// The connection closes here if no other clone holds it. Later calls through this
    /// wrapper fail with [`DbcError::ConnectionReset`].
    pub fn reset(&mut self) {
        self.conn = None;
    }

    /// Run `f` with exclusive access to the connection
    pub fn with_connection<R>(&self, f: impl FnOnce(&mut dyn DriverConnection) -> R) -> Result<R> {
        let live = self.conn.as_ref().ok_or(DbcError::ConnectionReset)?;
        let mut guard = live.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut **guard))
    }

    /// Execute a statement, discarding results
    pub fn execute(&self, sql: &str) -> Result<()> {
        self.with_connection(|conn| conn.execute(sql))?
            .map_err(|e| DbcError::query_failed(e.to_string()))
    }

    pub fn server_version(&self) -> Result<Option<String>> {
        self.with_connection(|conn| conn.server_version())
    }

    /// Name of the driver that opened the connection
    #[must_use]
    pub fn driver_name(&self) -> Option<&str> {
        self.conn.as_ref().map(|live| live.driver.as_str())
    }

    #[must_use]
    pub fn tunnel(&self) -> Option<&Arc<SharedTunnel>> {
        self.tunnel.as_ref()
    }

    /// Number of owners sharing the connection, 0 after `reset`
    #[must_use]
    pub fn owner_count(&self) -> usize {
        self.conn.as_ref().map_or(0, Arc::strong_count)
    }
}

impl std::fmt::Debug for ConnectionWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionWrapper")
            .field("driver", &self.driver_name())
            .field("open", &self.is_open())
            .field("tunnel", &self.tunnel)
            .finish()
    }
}
