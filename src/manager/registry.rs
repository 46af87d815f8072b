//! Driver registry
//!
//! Maps driver names to lazily initialized drivers. The map itself sits behind a
//! read-write lock that is only held to find or insert an entry; each entry carries its
//! own lock so the first use of one driver does not block lookups of another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::engine::DatabaseDriver;
use crate::error::{DbcError, Result};

/// Builds a driver on first use
pub type DriverFactory = Arc<dyn Fn() -> Result<Arc<dyn DatabaseDriver>> + Send + Sync>;

pub(crate) struct DriverEntry {
    factory: Option<DriverFactory>,
    driver: Mutex<Option<Arc<dyn DatabaseDriver>>>,
}

impl DriverEntry {
    fn lazy(factory: DriverFactory) -> Self {
        Self { factory: Some(factory), driver: Mutex::new(None) }
    }

    fn loaded(driver: Arc<dyn DatabaseDriver>) -> Self {
        Self { factory: None, driver: Mutex::new(Some(driver)) }
    }

    /// The driver, running the factory if this is the first use
    ///
    /// A failing factory leaves the entry unloaded, so a later call tries again.
    pub(crate) fn get(&self, name: &str) -> Result<Arc<dyn DatabaseDriver>> {
        let mut slot = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(driver) = slot.as_ref() {
            return Ok(Arc::clone(driver));
        }
        let factory = self
            .factory
            .as_ref()
            .ok_or_else(|| DbcError::driver_not_found(name.to_string()))?;
        let driver = factory()?;
        tracing::debug!(driver = name, client = %driver.client_version(), "driver initialized");
        *slot = Some(Arc::clone(&driver));
        Ok(driver)
    }

    fn get_loaded(&self) -> Option<Arc<dyn DatabaseDriver>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[derive(Default)]
pub(crate) struct DriverRegistry {
    entries: RwLock<HashMap<String, Arc<DriverEntry>>>,
}

impl DriverRegistry {
    /// Register (or replace) a lazily built driver
    pub(crate) fn register(&self, name: String, factory: DriverFactory) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(name, Arc::new(DriverEntry::lazy(factory)));
    }

    /// Insert a driver that is already built, keeping any entry registered meanwhile
    pub(crate) fn insert_loaded(&self, name: &str, driver: Arc<dyn DatabaseDriver>) -> Arc<DriverEntry> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            entries
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(DriverEntry::loaded(driver))),
        )
    }

    pub(crate) fn entry(&self, name: &str) -> Option<Arc<DriverEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
    }

    /// Drivers that have been initialized, sorted by name
    pub(crate) fn loaded(&self) -> Vec<(String, Arc<dyn DatabaseDriver>)> {
        let entries: Vec<(String, Arc<DriverEntry>)> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(entry)))
            .collect();
        let mut loaded: Vec<_> = entries
            .into_iter()
            .filter_map(|(name, entry)| entry.get_loaded().map(|driver| (name, driver)))
            .collect();
        loaded.sort_by(|a, b| a.0.cmp(&b.0));
        loaded
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.entries.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionParameters;
    use crate::engine::{ConnectOptions, DriverConnection, DriverError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NamedDriver(&'static str);

    impl DatabaseDriver for NamedDriver {
        fn name(&self) -> &str {
            self.0
        }

        fn client_version(&self) -> String {
            "1.0".to_string()
        }

        fn requires_password(&self, _params: &ConnectionParameters) -> bool {
            false
        }

        fn connect(
            &self,
            _options: &ConnectOptions<'_>,
        ) -> std::result::Result<Box<dyn DriverConnection>, DriverError> {
            Err(DriverError::failed("not a real driver"))
        }
    }

    #[test]
    fn test_factory_runs_once() {
        let registry = DriverRegistry::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.register(
            "fake".into(),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, DbcError>(Arc::new(NamedDriver("fake")) as Arc<dyn DatabaseDriver>)
            }),
        );

        assert!(registry.loaded().is_empty());
        let entry = registry.entry("fake").unwrap();
        let a = entry.get("fake").unwrap();
        let b = registry.entry("fake").unwrap().get("fake").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.loaded().len(), 1);
    }

    #[test]
    fn test_failing_factory_retries_later() {
        let registry = DriverRegistry::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.register(
            "flaky".into(),
            Arc::new(move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(DbcError::driver_not_found("flaky: client library missing"))
                } else {
                    Ok(Arc::new(NamedDriver("flaky")) as Arc<dyn DatabaseDriver>)
                }
            }),
        );

        let entry = registry.entry("flaky").unwrap();
        assert!(entry.get("flaky").is_err());
        assert!(registry.loaded().is_empty());
        assert!(entry.get("flaky").is_ok());
    }

    #[test]
    fn test_insert_loaded_keeps_existing() {
        let registry = DriverRegistry::default();
        registry.insert_loaded("a", Arc::new(NamedDriver("first")));
        let entry = registry.insert_loaded("a", Arc::new(NamedDriver("second")));
        assert_eq!(entry.get("a").unwrap().name(), "first");
    }

    #[test]
    fn test_names_sorted() {
        let registry = DriverRegistry::default();
        registry.insert_loaded("sqlite", Arc::new(NamedDriver("sqlite")));
        registry.insert_loaded("mysql", Arc::new(NamedDriver("mysql")));
        assert_eq!(registry.names(), vec!["mysql".to_string(), "sqlite".to_string()]);
        assert!(registry.entry("postgres").is_none());
    }
}
