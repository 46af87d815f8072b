//! Driver discovery
//!
//! Drivers that were not registered explicitly are looked up in the driver directory
//! when first requested. The directory holds one JSON manifest per driver name:
//!
//! ```json
//! // <driver_dir>/com.mysql.rdbms.mysql.driver.native.json
//! { "backend": "mysql" }
//! ```
//!
//! The manifest maps a vendor-style driver name onto one of the built-in backends.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::{Backend, DatabaseDriver};
use crate::error::{DbcError, Result};

/// Resolves a driver name to an implementation found in a directory
pub trait DriverLoader: Send + Sync {
    /// Load `name` from `dir`
    ///
    /// Returns `Ok(None)` when the directory has nothing for `name`, and an error when
    /// something was found but could not be loaded.
    fn load(&self, dir: &Path, name: &str) -> Result<Option<Arc<dyn DatabaseDriver>>>;
}

#[derive(Debug, Deserialize)]
struct DriverManifest {
    backend: Backend,
}

/// Loader reading `<dir>/<name>.json` manifests
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestDriverLoader;

impl DriverLoader for ManifestDriverLoader {
    fn load(&self, dir: &Path, name: &str) -> Result<Option<Arc<dyn DatabaseDriver>>> {
        // Driver names become file names, keep them inside the directory
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(DbcError::driver_not_found(format!("invalid driver name '{name}'")));
        }

        let path = dir.join(format!("{name}.json"));
        if !path.is_file() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path).map_err(|e| {
            DbcError::driver_not_found(format!("{name}: could not read {}: {e}", path.display()))
        })?;
        let manifest: DriverManifest = serde_json::from_str(&contents).map_err(|e| {
            DbcError::driver_not_found(format!("{name}: invalid manifest {}: {e}", path.display()))
        })?;

        tracing::debug!(driver = name, backend = %manifest.backend, "loaded driver manifest");
        manifest.backend.instantiate().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let dir = std::env::temp_dir().join(format!("cdbc_loader_{tag}_{nanos}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_manifest_is_none() {
        let dir = temp_dir("missing");
        assert!(ManifestDriverLoader.load(&dir, "nothing").unwrap().is_none());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_invalid_manifest_is_driver_not_found() {
        let dir = temp_dir("invalid");
        fs::write(dir.join("broken.json"), "{ not json").unwrap();
        let err = ManifestDriverLoader.load(&dir, "broken").err().unwrap();
        assert!(matches!(err, DbcError::DriverNotFound(ref m) if m.contains("invalid manifest")));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_unknown_backend_is_driver_not_found() {
        let dir = temp_dir("unknown");
        fs::write(dir.join("oracle.json"), r#"{"backend":"oracle"}"#).unwrap();
        assert!(matches!(
            ManifestDriverLoader.load(&dir, "oracle"),
            Err(DbcError::DriverNotFound(_))
        ));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_path_traversal_rejected() {
        let dir = temp_dir("traversal");
        assert!(ManifestDriverLoader.load(&dir, "../etc/passwd").is_err());
        let _ = fs::remove_dir_all(&dir);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_manifest_maps_to_backend() {
        let dir = temp_dir("sqlite");
        fs::write(dir.join("org.sqlite.driver.json"), r#"{"backend":"sqlite"}"#).unwrap();
        let driver = ManifestDriverLoader.load(&dir, "org.sqlite.driver").unwrap().unwrap();
        assert_eq!(driver.name(), "sqlite");
        let _ = fs::remove_dir_all(&dir);
    }
}
