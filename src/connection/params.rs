//! Connection parameters
//!
//! Immutable description of a target endpoint. Owned by the caller; the core clones
//! what it needs to retain. Fields are driver-specific (e.g. `file` only applies to `SQLite`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// SSL/TLS negotiation mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// No TLS
    Disabled,
    /// TLS when the server offers it
    #[default]
    Preferred,
    /// TLS required, server certificate not verified
    Required,
    /// TLS required, certificate must chain to the configured CA
    VerifyCa,
    /// TLS required, certificate must match the host name
    VerifyIdentity,
}

impl SslMode {
    /// Whether TLS must be negotiated
    #[must_use]
    pub const fn requires_tls(&self) -> bool {
        matches!(self, Self::Required | Self::VerifyCa | Self::VerifyIdentity)
    }

    /// Whether the server certificate must be verified
    #[must_use]
    pub const fn requires_verification(&self) -> bool {
        matches!(self, Self::VerifyCa | Self::VerifyIdentity)
    }
}

impl std::str::FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" => Ok(Self::Disabled),
            "preferred" => Ok(Self::Preferred),
            "required" => Ok(Self::Required),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-identity" => Ok(Self::VerifyIdentity),
            other => Err(format!(
                "unknown ssl mode '{other}' (expected disabled, preferred, required, verify-ca or verify-identity)"
            )),
        }
    }
}

/// SSL options
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SslOptions {
    #[serde(default)]
    pub mode: SslMode,

    /// CA certificate file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<PathBuf>,

    /// Client certificate file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,

    /// Client private key file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,

    /// Permitted cipher list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cipher: Option<String>,
}

/// Tunnel options (e.g. SSH port forward)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TunnelOptions {
    /// Tunnel endpoint host
    pub host: String,

    /// Tunnel endpoint port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Tunnel login
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Private key file for the tunnel login
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
}

/// Identity of a tunnel: the target endpoint plus the tunnel settings
///
/// Two parameter sets with the same key can share one tunnel even if they differ in
/// user, schema or driver options.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TunnelKey {
    pub target_host: String,
    pub target_port: Option<u16>,
    pub tunnel: TunnelOptions,
}

/// Connection parameters for a database endpoint
///
/// Passwords are deliberately absent: they live in [`crate::auth::Authentication`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParameters {
    /// Driver identifier (e.g. "mysql", "postgres", "sqlite" or a discoverable driver name)
    pub driver: String,

    /// Hostname (for client-server drivers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Port number (for client-server drivers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Local socket path (alternative to host/port)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket: Option<PathBuf>,

    /// Database file path (for sqlite)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Username
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Default schema / database name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    #[serde(default)]
    pub ssl: SslOptions,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<TunnelOptions>,

    /// Free-form driver options
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl ConnectionParameters {
    /// Create empty parameters for a driver
    pub fn new(driver: impl Into<String>) -> Self {
        Self { driver: driver.into(), ..Default::default() }
    }

    /// Create `MySQL` connection parameters
    #[must_use]
    pub fn mysql(host: &str, port: u16, user: &str, schema: Option<&str>) -> Self {
        let mut params = Self::new("mysql").host(host).port(port).user(user);
        params.schema = schema.map(str::to_string);
        params
    }

    /// Create `PostgreSQL` connection parameters
    #[must_use]
    pub fn postgres(host: &str, port: u16, user: &str, database: &str) -> Self {
        Self::new("postgres").host(host).port(port).user(user).schema(database)
    }

    /// Create `SQLite` connection parameters
    #[must_use]
    pub fn sqlite(file: impl Into<PathBuf>) -> Self {
        Self { file: Some(file.into()), ..Self::new("sqlite") }
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn socket(mut self, socket: impl Into<PathBuf>) -> Self {
        self.socket = Some(socket.into());
        self
    }

    #[must_use]
    pub fn tunnel(mut self, tunnel: TunnelOptions) -> Self {
        self.tunnel = Some(tunnel);
        self
    }

    #[must_use]
    pub fn ssl(mut self, ssl: SslOptions) -> Self {
        self.ssl = ssl;
        self
    }

    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Human-readable endpoint: `user@host:port`, `user@socket` or the database file
    #[must_use]
    pub fn host_identifier(&self) -> String {
        if let Some(file) = &self.file {
            return format!("{}:{}", self.driver, file.display());
        }
        let user = self.user.as_deref().unwrap_or("");
        let endpoint = if let Some(socket) = &self.socket {
            socket.display().to_string()
        } else {
            let host = self.host.as_deref().unwrap_or("localhost");
            match self.port {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            }
        };
        let endpoint = match &self.tunnel {
            Some(tunnel) => format!("{endpoint} via {}", tunnel.host),
            None => endpoint,
        };
        format!("{}:{user}@{endpoint}", self.driver)
    }

    /// Tunnel reuse key, `None` when no tunnel is configured
    #[must_use]
    pub fn tunnel_key(&self) -> Option<TunnelKey> {
        self.tunnel.as_ref().map(|tunnel| TunnelKey {
            target_host: self.host.clone().unwrap_or_else(|| "localhost".to_string()),
            target_port: self.port,
            tunnel: tunnel.clone(),
        })
    }

    /// Password cache key for a (parameters, service) pair
    ///
    /// Covers every field that changes which account the password belongs to.
    #[must_use]
    pub fn credential_key(&self, service: &str) -> String {
        let path = |p: &Option<PathBuf>| p.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
        format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.driver,
            self.user.as_deref().unwrap_or(""),
            self.host.as_deref().unwrap_or(""),
            self.port.map(|p| p.to_string()).unwrap_or_default(),
            path(&self.socket),
            path(&self.file),
            self.tunnel.as_ref().map(|t| t.host.as_str()).unwrap_or(""),
            service,
        )
    }
}
