//! cdbc - Database Connection and Driver Management Core
//!
//! cdbc manages authenticated, optionally tunneled connections to heterogeneous database
//! backends. Callers describe an endpoint with [`ConnectionParameters`]; the
//! [`DriverManager`] resolves the driver, sets up the tunnel, finds or asks for the
//! password and hands back a shared [`ConnectionWrapper`].
//!
//! # Core Principles
//! - The core never shows UI: passwords and tunnels come from registered functions
//! - Exactly one authentication retry, enforced by an explicit state machine
//! - Passwords are zeroed on release and never appear in errors, logs or `Debug` output
//! - The last owner of a connection closes it, the last owner of a tunnel disconnects it
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`auth`] - Password lifecycle for a connection + service pair
//! - [`connection`] - Connection parameters, shared wrapper and session bookkeeping
//! - [`tunnel`] - Tunnel capability and reuse cache
//! - [`engine`] - Driver traits, built-in backends and driver discovery
//! - [`manager`] - The driver manager
//! - [`config`] - Settings and connection profiles
//! - [`output`] - JSON output envelope types

pub mod auth;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod manager;
pub mod output;
pub mod tunnel;

// Re-export commonly used types for convenience
pub use auth::Authentication;
pub use config::{
    list_connections, resolve_connection, save_connection, ConfigFile, ConfigLocation, Settings,
    StoredConnection,
};
pub use connection::{
    ConnectionHandler, ConnectionParameters, ConnectionWrapper, SslMode, SslOptions, TunnelKey,
    TunnelOptions,
};
pub use engine::{
    Backend, ConnectOptions, DatabaseDriver, DriverConnection, DriverError, DriverInfo,
    DriverLoader, ManifestDriverLoader,
};
pub use error::{DbcError, Result};
pub use manager::{
    ConnectAttempt, ConnectState, DriverFactory, DriverManager, InitCallback, PasswordFindFn,
    PasswordRequestFn,
};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use tunnel::{SharedTunnel, TunnelCache, TunnelConnection, TunnelFactory, TunnelMessage};
