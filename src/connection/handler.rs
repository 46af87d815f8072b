//! Per-session bookkeeping
//!
//! A [`ConnectionHandler`] tracks one logical session opened by the application: the
//! server-side id, the active schema, autocommit and the cooperative stop flag polled
//! while executing scripts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use super::ConnectionWrapper;
use crate::error::{DbcError, Result};

#[derive(Debug)]
struct SessionState {
    schema: Option<String>,
    autocommit: bool,
    wrapper: ConnectionWrapper,
}

/// One logical session
#[derive(Debug)]
pub struct ConnectionHandler {
    id: i64,
    name: String,
    ssl_cipher: String,
    state: RwLock<SessionState>,
    stop_requested: AtomicBool,
}

impl ConnectionHandler {
    /// Start tracking a session on an open connection
    ///
    /// The id is `-1` and the cipher empty when the driver does not report them.
    pub fn open(name: impl Into<String>, wrapper: ConnectionWrapper) -> Result<Self> {
        let (id, ssl_cipher) =
            wrapper.with_connection(|conn| (conn.connection_id(), conn.ssl_cipher()))?;
        let handler = Self {
            id: id.unwrap_or(-1),
            name: name.into(),
            ssl_cipher: ssl_cipher.unwrap_or_default(),
            state: RwLock::new(SessionState { schema: None, autocommit: true, wrapper }),
            stop_requested: AtomicBool::new(false),
        };
        tracing::debug!(id = handler.id, name = %handler.name, "session opened");
        Ok(handler)
    }

    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Negotiated cipher, empty for plain-text sessions
    #[must_use]
    pub fn ssl_cipher(&self) -> &str {
        &self.ssl_cipher
    }

    #[must_use]
    pub fn active_schema(&self) -> Option<String> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).schema.clone()
    }

    #[must_use]
    pub fn autocommit(&self) -> bool {
        self.state.read().unwrap_or_else(PoisonError::into_inner).autocommit
    }

    /// A clone of the session's connection wrapper
    #[must_use]
    pub fn wrapper(&self) -> ConnectionWrapper {
        self.state.read().unwrap_or_else(PoisonError::into_inner).wrapper.clone()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.read().unwrap_or_else(PoisonError::into_inner).wrapper.is_open()
    }

    /// Switch the default schema
    pub fn use_schema(&self, schema: &str) -> Result<()> {
        self.wrapper()
            .with_connection(|conn| conn.set_schema(schema))?
            .map_err(|e| DbcError::query_failed(e.to_string()))?;
        self.state.write().unwrap_or_else(PoisonError::into_inner).schema = Some(schema.to_string());
        Ok(())
    }

    pub fn set_autocommit(&self, enabled: bool) -> Result<()> {
        self.wrapper()
            .with_connection(|conn| conn.set_autocommit(enabled))?
            .map_err(|e| DbcError::query_failed(e.to_string()))?;
        self.state.write().unwrap_or_else(PoisonError::into_inner).autocommit = enabled;
        Ok(())
    }

    /// Ask running work on this session to stop at its next checkpoint
    pub fn request_stop_query(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stop_query_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn clear_stop_query(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
    }

    /// Execute statements in order, checking the stop flag before each one
    ///
    /// Returns the number of statements executed. A stop request aborts with
    /// [`DbcError::QueryCancelled`] and clears the flag.
    pub fn execute_script<I, S>(&self, statements: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wrapper = self.wrapper();
        let mut executed = 0;
        for statement in statements {
            if self.stop_requested.swap(false, Ordering::SeqCst) {
                tracing::info!(id = self.id, executed, "script stopped on request");
                return Err(DbcError::QueryCancelled { executed });
            }
            wrapper.execute(statement.as_ref())?;
            executed += 1;
        }
        Ok(executed)
    }

    /// Release the session's connection handle
    pub fn close(&self) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).wrapper.reset();
        tracing::debug!(id = self.id, name = %self.name, "session closed");
    }
}
