//! Tunnel support
//!
//! A tunnel establishes a local port forward (e.g. over SSH) before the driver connects.
//! Implementations come from the embedding application through a [`TunnelFactory`].
//!
//! # Ownership
//! - [`SharedTunnel`] wraps one implementation and is shared (`Arc`) by every
//!   `ConnectionWrapper` using it
//! - `connect` runs at most once per shared tunnel, `disconnect` at most once, when the
//!   last owner drops it
//! - [`TunnelCache`] holds weak references only, so it never keeps a tunnel alive

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use crate::connection::{ConnectionParameters, TunnelKey};
use crate::error::{DbcError, Result};

/// Diagnostic or status message produced by a tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelMessage {
    /// Message category, e.g. "info", "progress", "error"
    pub kind: String,
    pub text: String,
}

impl TunnelMessage {
    pub fn new(kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self { kind: kind.into(), text: text.into() }
    }
}

/// A port-forwarding tunnel
///
/// Methods take `&self`: `next_message` is polled from other threads while `connect`
/// blocks, so implementations synchronize internally.
pub trait TunnelConnection: Send + Sync {
    /// Establish the tunnel. May block.
    fn connect(&self, params: &ConnectionParameters) -> Result<()>;

    /// Tear the tunnel down. Must be a no-op when not connected.
    fn disconnect(&self);

    /// Local forwarded port. Only meaningful after a successful `connect`.
    fn port(&self) -> u16;

    /// Drain at most one pending message without blocking
    fn next_message(&self) -> Option<TunnelMessage>;
}

/// Creates tunnels for parameters that carry tunnel options
///
/// Returning `Ok(None)` means no tunnel is needed for these parameters.
pub type TunnelFactory =
    Arc<dyn Fn(&ConnectionParameters) -> Result<Option<Box<dyn TunnelConnection>>> + Send + Sync>;

const IDLE: u8 = 0;
const CONNECTED: u8 = 1;
const FAILED: u8 = 2;

/// Reference-counted tunnel handle
///
/// The phase is an atomic so readers never wait on a connect in progress; only
/// callers of [`SharedTunnel::ensure_connected`] queue on `connecting`.
pub struct SharedTunnel {
    key: TunnelKey,
    inner: Box<dyn TunnelConnection>,
    phase: AtomicU8,
    failure: OnceLock<String>,
    connecting: Mutex<()>,
}

impl SharedTunnel {
    pub fn new(key: TunnelKey, inner: Box<dyn TunnelConnection>) -> Self {
        Self {
            key,
            inner,
            phase: AtomicU8::new(IDLE),
            failure: OnceLock::new(),
            connecting: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &TunnelKey {
        &self.key
    }

    /// Connect unless already connected
    ///
    /// Concurrent callers wait for the first one. A tunnel that failed to connect stays
    /// failed and reports the same error without retrying.
    pub fn ensure_connected(&self, params: &ConnectionParameters) -> Result<()> {
        if let Some(done) = self.settled() {
            return done;
        }
        let _connecting = self.connecting.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(done) = self.settled() {
            return done;
        }

        tracing::debug!(tunnel = %self.key.tunnel.host, "connecting tunnel");
        match self.inner.connect(params) {
            Ok(()) => {
                self.phase.store(CONNECTED, Ordering::Release);
                tracing::info!(
                    tunnel = %self.key.tunnel.host,
                    port = self.inner.port(),
                    "tunnel established"
                );
                Ok(())
            }
            Err(e) => {
                let err = e.into_tunnel_error();
                // Release whatever the partial connect set up
                self.inner.disconnect();
                let _ = self.failure.set(err.message());
                self.phase.store(FAILED, Ordering::Release);
                tracing::warn!(tunnel = %self.key.tunnel.host, "tunnel failed: {err}");
                Err(err)
            }
        }
    }

    /// Outcome of an earlier connect, `None` while idle
    fn settled(&self) -> Option<Result<()>> {
        match self.phase.load(Ordering::Acquire) {
            CONNECTED => Some(Ok(())),
            FAILED => {
                let message = self.failure.get().map_or("tunnel failed", String::as_str);
                Some(Err(DbcError::tunnel_error(message)))
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.phase.load(Ordering::Acquire) == CONNECTED
    }

    fn is_failed(&self) -> bool {
        self.phase.load(Ordering::Acquire) == FAILED
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.port()
    }

    pub fn next_message(&self) -> Option<TunnelMessage> {
        self.inner.next_message()
    }
}

impl Drop for SharedTunnel {
    fn drop(&mut self) {
        if *self.phase.get_mut() == CONNECTED {
            self.inner.disconnect();
            tracing::debug!(tunnel = %self.key.tunnel.host, "tunnel disconnected");
        }
    }
}

impl std::fmt::Debug for SharedTunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTunnel")
            .field("key", &self.key)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Reuse cache of live tunnels, keyed by [`TunnelKey`]
#[derive(Default)]
pub struct TunnelCache {
    entries: Mutex<HashMap<TunnelKey, Weak<SharedTunnel>>>,
}

impl TunnelCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live, not failed tunnel for `key`
    ///
    /// The phase is checked after the cache lock is released, and a tunnel handle is
    /// never dropped while the lock is held.
    fn lookup(&self, key: &TunnelKey) -> Option<Arc<SharedTunnel>> {
        let found = {
            let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.get(key).and_then(Weak::upgrade)
        };
        found.filter(|t| !t.is_failed())
    }

    /// Return a live tunnel for `key`, or create one with `create`
    ///
    /// `create` runs without the cache lock. If another thread registered a tunnel for
    /// the same key meanwhile, the fresh one is discarded; it was never connected, so
    /// dropping it does not call `disconnect`. A connect in progress on any tunnel
    /// never delays this call.
    pub fn get_or_create<F>(&self, key: TunnelKey, create: F) -> Result<Option<Arc<SharedTunnel>>>
    where
        F: FnOnce() -> Result<Option<Box<dyn TunnelConnection>>>,
    {
        if let Some(existing) = self.lookup(&key) {
            tracing::debug!(tunnel = %key.tunnel.host, "reusing tunnel");
            return Ok(Some(existing));
        }

        let Some(created) = create()? else {
            return Ok(None);
        };
        let fresh = Arc::new(SharedTunnel::new(key.clone(), created));

        let (current, reuse) = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.retain(|_, weak| weak.strong_count() > 0);
            let current = entries.get(&key).and_then(Weak::upgrade);
            // Phase reads are atomic loads, they never wait on a connect
            let reuse = current.as_ref().is_some_and(|t| !t.is_failed());
            if !reuse {
                entries.insert(key.clone(), Arc::downgrade(&fresh));
            }
            (current, reuse)
        };

        match current {
            Some(existing) if reuse => {
                tracing::debug!(tunnel = %key.tunnel.host, "discarding duplicate tunnel");
                Ok(Some(existing))
            }
            _ => Ok(Some(fresh)),
        }
    }

    /// Number of tunnels still alive
    #[must_use]
    pub fn live_count(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|weak| weak.strong_count() > 0).count()
    }
}
