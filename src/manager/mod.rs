//! Driver Manager
//!
//! The [`DriverManager`] turns connection parameters into an open [`ConnectionWrapper`]:
//! it resolves the driver, obtains (or reuses) a tunnel, finds or requests the password,
//! opens the connection with a single authentication retry and runs the caller's init
//! callback.
//!
//! # Composition
//! The application builds one manager at its composition root and shares it (`Arc`).
//! [`DriverManager::global`] offers a process-wide instance for callers that cannot be
//! handed one; [`DriverManager::install_global`] lets the composition root provide it.
//!
//! # Locking
//! No lock is held while calling a driver, a tunnel, the tunnel factory, the password
//! functions or the init callback. Registered functions are cloned out of their slots
//! before they are invoked.

mod password_cache;
mod registry;
mod state;

pub use registry::DriverFactory;
pub use state::{ConnectAttempt, ConnectState};

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, Weak};

use crate::auth::Authentication;
use crate::config::Settings;
use crate::connection::{ConnectionParameters, ConnectionWrapper};
use crate::engine::{
    Backend, ConnectOptions, DatabaseDriver, DriverConnection, DriverError, DriverInfo,
    DriverLoader, ManifestDriverLoader,
};
use crate::error::{DbcError, Result};
use crate::tunnel::{SharedTunnel, TunnelCache, TunnelConnection, TunnelFactory};
use password_cache::PasswordCache;
use registry::DriverRegistry;

/// Looks up a stored password (keychain, config file, ...)
pub type PasswordFindFn = Arc<dyn Fn(&ConnectionParameters) -> Option<String> + Send + Sync>;

/// Asks the user for a password; `force_prompt` bypasses any stored value.
/// `None` means the user cancelled.
pub type PasswordRequestFn = Arc<dyn Fn(&ConnectionParameters, bool) -> Option<String> + Send + Sync>;

/// Session setup run on a fresh connection before it is handed out
pub type InitCallback<'a> = &'a dyn Fn(&mut dyn DriverConnection, &ConnectionParameters) -> Result<()>;

/// Host every tunnel forwards from
const TUNNEL_HOST: &str = "127.0.0.1";

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);
static GLOBAL: OnceLock<Arc<DriverManager>> = OnceLock::new();

thread_local! {
    /// Drivers used on this thread: (manager id, driver name, driver)
    static THREAD_DRIVERS: RefCell<Vec<(u64, String, Weak<dyn DatabaseDriver>)>> =
        const { RefCell::new(Vec::new()) };
}

/// Connection and driver manager
pub struct DriverManager {
    id: u64,
    settings: RwLock<Settings>,
    registry: DriverRegistry,
    loader: RwLock<Arc<dyn DriverLoader>>,
    tunnel_factory: RwLock<Option<TunnelFactory>>,
    password_find: RwLock<Option<PasswordFindFn>>,
    password_request: RwLock<Option<PasswordRequestFn>>,
    password_cache: PasswordCache,
    tunnels: TunnelCache,
    /// Client version per loaded driver name
    client_versions: Mutex<HashMap<String, String>>,
}

/// Clone a registered function out of its slot
fn registered<T: Clone>(slot: &RwLock<Option<T>>) -> Option<T> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

impl DriverManager {
    /// Create a manager with no drivers registered
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            password_cache: PasswordCache::new(settings.password_cache_ttl()),
            settings: RwLock::new(settings),
            registry: DriverRegistry::default(),
            loader: RwLock::new(Arc::new(ManifestDriverLoader)),
            tunnel_factory: RwLock::new(None),
            password_find: RwLock::new(None),
            password_request: RwLock::new(None),
            tunnels: TunnelCache::new(),
            client_versions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a manager with every compiled-in backend registered under its name
    ///
    /// Backends are instantiated on first use.
    #[must_use]
    pub fn with_builtin_drivers(settings: Settings) -> Self {
        let manager = Self::new(settings);
        for backend in Backend::ALL.into_iter().filter(Backend::is_available) {
            manager.register_driver(backend.as_str(), move || backend.instantiate());
        }
        manager
    }

    /// The process-wide manager, created with built-in drivers and default settings on
    /// first use unless one was installed before
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::with_builtin_drivers(Settings::default()))))
    }

    /// Install `manager` as the process-wide instance
    ///
    /// Fails if [`DriverManager::global`] was already used or another manager installed.
    pub fn install_global(manager: Arc<Self>) -> Result<Arc<Self>> {
        GLOBAL.set(Arc::clone(&manager)).map_err(|_| DbcError::InvalidState {
            expected: "no global driver manager".to_string(),
            actual: "global driver manager already initialized".to_string(),
        })?;
        Ok(manager)
    }

    /// Current settings
    #[must_use]
    pub fn settings(&self) -> Settings {
        self.settings.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    // ---- configuration ----

    /// Directory scanned for drivers that are not registered
    pub fn set_driver_dir(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        tracing::debug!(path = %path.display(), "driver directory set");
        self.settings.write().unwrap_or_else(PoisonError::into_inner).driver_dir = Some(path);
    }

    /// Replace the loader used for the driver directory
    pub fn set_driver_loader(&self, loader: impl DriverLoader + 'static) {
        *self.loader.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(loader);
    }

    /// Register a driver under `name`; `factory` runs once, on first use
    pub fn register_driver<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn DatabaseDriver>> + Send + Sync + 'static,
    {
        let name = name.into();
        self.client_versions.lock().unwrap_or_else(PoisonError::into_inner).remove(&name);
        self.registry.register(name, Arc::new(factory));
    }

    pub fn set_tunnel_factory<F>(&self, factory: F)
    where
        F: Fn(&ConnectionParameters) -> Result<Option<Box<dyn TunnelConnection>>> + Send + Sync + 'static,
    {
        *self.tunnel_factory.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(factory));
    }

    pub fn set_password_find<F>(&self, find: F)
    where
        F: Fn(&ConnectionParameters) -> Option<String> + Send + Sync + 'static,
    {
        *self.password_find.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(find));
    }

    pub fn set_password_request<F>(&self, request: F)
    where
        F: Fn(&ConnectionParameters, bool) -> Option<String> + Send + Sync + 'static,
    {
        *self.password_request.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(request));
    }

    // ---- password functions ----

    /// Ask the registered find function; `None` when none is registered
    pub fn find_stored_password(&self, params: &ConnectionParameters) -> Option<String> {
        registered(&self.password_find).and_then(|find| find(params))
    }

    /// Ask the registered request function; `None` when none is registered or the user
    /// cancelled
    pub fn request_password(&self, params: &ConnectionParameters, force_prompt: bool) -> Option<String> {
        registered(&self.password_request).and_then(|request| request(params, force_prompt))
    }

    /// Drop any cached password
    pub fn clear_password_cache(&self) {
        self.password_cache.clear();
    }

    // ---- drivers ----

    /// Resolve a driver by name: registered drivers first, then the driver directory
    pub fn get_driver(&self, name: &str) -> Result<Arc<dyn DatabaseDriver>> {
        if let Some(entry) = self.registry.entry(name) {
            return entry.get(name);
        }

        let Some(dir) = self.settings().driver_dir else {
            return Err(DbcError::driver_not_found(format!(
                "{name} (not registered and no driver directory set)"
            )));
        };
        let loader = Arc::clone(&self.loader.read().unwrap_or_else(PoisonError::into_inner));
        match loader.load(&dir, name)? {
            Some(driver) => {
                tracing::info!(driver = name, dir = %dir.display(), "loaded driver from directory");
                self.registry.insert_loaded(name, driver).get(name)
            }
            None => Err(DbcError::driver_not_found(format!(
                "{name} (not found in {})",
                dir.display()
            ))),
        }
    }

    /// Drivers loaded so far; never forces a driver to load
    #[must_use]
    pub fn get_drivers(&self) -> Vec<DriverInfo> {
        self.registry
            .loaded()
            .into_iter()
            .map(|(name, driver)| DriverInfo { name, client_version: driver.client_version() })
            .collect()
    }

    /// Names of every registered driver, loaded or not
    #[must_use]
    pub fn registered_drivers(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Client library version(s) of the loaded drivers, `name: version` joined by `; `
    ///
    /// Each driver is asked once; drivers loaded later show up on the next call.
    #[must_use]
    pub fn client_lib_version(&self) -> String {
        let mut parts = Vec::new();
        for (name, driver) in self.registry.loaded() {
            let cached = self.client_versions.lock().unwrap_or_else(PoisonError::into_inner).get(&name).cloned();
            let version = match cached {
                Some(version) => version,
                None => {
                    let version = driver.client_version();
                    self.client_versions
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(name.clone(), version.clone());
                    version
                }
            };
            parts.push(format!("{name}: {version}"));
        }
        parts.join("; ")
    }

    fn note_thread_use(&self, name: &str, driver: &Arc<dyn DatabaseDriver>) {
        THREAD_DRIVERS.with(|used| {
            let mut used = used.borrow_mut();
            if !used.iter().any(|(id, n, _)| *id == self.id && n == name) {
                used.push((self.id, name.to_string(), Arc::downgrade(driver)));
            }
        });
    }

    /// Release per-thread driver resources for drivers this thread used
    ///
    /// Safe to call repeatedly; a second call has nothing left to clean.
    pub fn thread_cleanup(&self) {
        let drivers: Vec<(String, Weak<dyn DatabaseDriver>)> = THREAD_DRIVERS.with(|used| {
            let mut used = used.borrow_mut();
            let (mine, others): (Vec<_>, Vec<_>) = used.drain(..).partition(|(id, _, _)| *id == self.id);
            *used = others;
            mine.into_iter().map(|(_, name, driver)| (name, driver)).collect()
        });
        for (name, driver) in drivers {
            if let Some(driver) = driver.upgrade() {
                tracing::debug!(driver = %name, "thread cleanup");
                driver.thread_cleanup();
            }
        }
    }

    // ---- tunnels ----

    /// A tunnel for `params`, reused when an equivalent one is alive
    ///
    /// `None` when the parameters carry no tunnel options or no factory is registered.
    pub fn get_tunnel(&self, params: &ConnectionParameters) -> Result<Option<Arc<SharedTunnel>>> {
        let Some(key) = params.tunnel_key() else {
            return Ok(None);
        };
        let Some(factory) = registered(&self.tunnel_factory) else {
            tracing::debug!(target_host = %key.target_host, "tunnel options set but no tunnel factory registered");
            return Ok(None);
        };
        self.tunnels.get_or_create(key, || factory(params).map_err(DbcError::into_tunnel_error))
    }

    /// Number of live tunnels
    #[must_use]
    pub fn live_tunnels(&self) -> usize {
        self.tunnels.live_count()
    }

    // ---- connections ----

    /// Open a connection, resolving tunnel and password with the registered functions
    ///
    /// The driver is resolved first, so an unknown driver never reaches the tunnel
    /// factory or the password functions. The tunnel is connected before any password
    /// lookup, so a broken tunnel never prompts. The password comes from the password
    /// cache, then the find function, then the request function.
    pub fn get_connection(
        &self,
        params: &ConnectionParameters,
        init: Option<InitCallback<'_>>,
    ) -> Result<ConnectionWrapper> {
        let driver = self.get_driver(&params.driver)?;
        let tunnel = self.get_tunnel(params)?;
        if let Some(tunnel) = &tunnel {
            tunnel.ensure_connected(params)?;
        }
        let auth = if driver.requires_password(params) {
            Some(self.initial_authentication(params)?)
        } else {
            None
        };
        self.get_connection_with(params, tunnel, auth, init)
    }

    fn initial_authentication(&self, params: &ConnectionParameters) -> Result<Arc<Authentication>> {
        let auth = Authentication::create(params, "");

        if let Some(password) = self.password_cache.get(&params.credential_key(auth.service())) {
            tracing::debug!(target_host = %params.host_identifier(), "using cached password");
            auth.set_password(&password);
        } else if let Some(password) = self.find_stored_password(params) {
            auth.set_password(&zeroize::Zeroizing::new(password));
        } else if let Some(request) = registered(&self.password_request) {
            let password = request(params, false)
                .ok_or_else(|| DbcError::cancelled(format!("password entry for {}", params.host_identifier())))?;
            auth.set_password(&zeroize::Zeroizing::new(password));
        }
        Ok(auth)
    }

    /// Open a connection with an explicit tunnel and authentication
    ///
    /// Walks [`ConnectState`]: tunnel connect, driver resolution, open, at most one
    /// authentication retry, init callback.
    pub fn get_connection_with(
        &self,
        params: &ConnectionParameters,
        tunnel: Option<Arc<SharedTunnel>>,
        auth: Option<Arc<Authentication>>,
        init: Option<InitCallback<'_>>,
    ) -> Result<ConnectionWrapper> {
        let mut attempt = ConnectAttempt::new();
        let result = self.run_attempt(&mut attempt, params, tunnel, auth, init);
        if let Err(e) = &result {
            attempt.fail();
            tracing::debug!(target_host = %params.host_identifier(), state = %attempt.state(), "connection attempt failed: {e}");
        }
        result
    }

    fn run_attempt(
        &self,
        attempt: &mut ConnectAttempt,
        params: &ConnectionParameters,
        tunnel: Option<Arc<SharedTunnel>>,
        auth: Option<Arc<Authentication>>,
        init: Option<InitCallback<'_>>,
    ) -> Result<ConnectionWrapper> {
        let forwarded_port = match &tunnel {
            Some(tunnel) => {
                attempt.transition(ConnectState::TunnelConnecting)?;
                tunnel.ensure_connected(params)?;
                Some(tunnel.port())
            }
            None => None,
        };

        attempt.transition(ConnectState::DriverResolving)?;
        let driver = self.get_driver(&params.driver)?;
        self.note_thread_use(&params.driver, &driver);

        let auth = auth.unwrap_or_else(|| Authentication::create(params, ""));
        let credential_key = params.credential_key(auth.service());
        let settings = self.settings();
        let (host, port) = match forwarded_port {
            Some(port) => (Some(TUNNEL_HOST), Some(port)),
            None => (params.host.as_deref(), params.port),
        };

        let conn = loop {
            attempt.transition(ConnectState::Authenticating)?;
            let password = auth.password();

            attempt.transition(ConnectState::Opening)?;
            let options = ConnectOptions {
                params,
                host,
                port,
                password: password.as_ref().map(|p| p.as_str()),
                connect_timeout: settings.connect_timeout(),
                read_timeout: settings.read_timeout(),
            };
            tracing::debug!(target_host = %params.host_identifier(), "opening connection");

            let message = match driver.connect(&options) {
                Ok(conn) => break conn,
                Err(DriverError::AccessDenied(message)) => message,
                Err(e @ DriverError::PasswordExpired(_)) => {
                    return Err(DbcError::connection_failed(e.to_string()));
                }
                Err(DriverError::Failed(message)) => return Err(DbcError::connection_failed(message)),
            };

            attempt.transition(ConnectState::AuthFailed)?;
            tracing::warn!(target_host = %params.host_identifier(), "access denied: {message}");
            auth.invalidate();
            self.password_cache.evict(&credential_key);

            let request = match registered(&self.password_request) {
                Some(request) if attempt.can_retry() => request,
                _ => return Err(DbcError::authentication_error(message, auth)),
            };
            let password = request(params, true).ok_or_else(|| {
                DbcError::cancelled(format!("password entry for {}", params.host_identifier()))
            })?;
            auth.set_password(&zeroize::Zeroizing::new(password));
        };

        if let Some(password) = auth.password() {
            self.password_cache.store(credential_key, &password);
        }

        let wrapper = ConnectionWrapper::new(driver.name(), conn, tunnel);
        if let Some(init) = init {
            attempt.transition(ConnectState::InitCallback)?;
            // On failure the wrapper is dropped, which closes the connection
            wrapper.with_connection(|conn| init(conn, params))?.map_err(|e| match e {
                DbcError::ConnectionSetupError(_) => e,
                other => DbcError::connection_setup(other.to_string()),
            })?;
        }

        attempt.transition(ConnectState::Ready)?;
        tracing::info!(target_host = %params.host_identifier(), driver = driver.name(), "connection established");
        Ok(wrapper)
    }
}

impl std::fmt::Debug for DriverManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverManager")
            .field("id", &self.id)
            .field("settings", &self.settings())
            .field("drivers", &self.registered_drivers())
            .field("live_tunnels", &self.live_tunnels())
            .finish_non_exhaustive()
    }
}
