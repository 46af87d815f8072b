//! MySQL Driver Implementation
//!
//! This module implements the `DatabaseDriver` trait for MySQL databases (including MariaDB).
//!
//! # Features
//! - Client-server connections via TCP or local socket
//! - TLS via rustls, mapped from the connection's SSL mode
//! - Access-denied and expired-password detection for the manager's retry logic
//!
//! # Implementation Notes
//! - Uses `mysql_async` (async driver) behind the blocking driver interface
//! - Futures run on a small runtime owned by the driver, also when called from async code
//! - Timeouts enforced via `tokio::time::timeout`
//! - `SslMode::Preferred` connects in plain text (`mysql_async` has no opportunistic TLS)

use mysql_async::{prelude::*, Conn, OptsBuilder, SslOpts};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{ConnectionParameters, SslMode};
use crate::engine::runtime::DriverRuntime;
use crate::engine::{ConnectOptions, DatabaseDriver, DriverConnection, DriverError};
use crate::error::{DbcError, Result};

/// Server error: access denied for user
const ER_ACCESS_DENIED_ERROR: u16 = 1045;
/// Server error: password must be reset before executing statements
const ER_MUST_CHANGE_PASSWORD: u16 = 1820;
/// Server error: password expired, login refused
const ER_MUST_CHANGE_PASSWORD_LOGIN: u16 = 1862;

const DEFAULT_PORT: u16 = 3306;

/// MySQL driver
pub struct MySqlDriver {
    runtime: Arc<DriverRuntime>,
}

impl MySqlDriver {
    /// Create the driver and its runtime
    pub fn new() -> Result<Self> {
        let runtime = DriverRuntime::new("cdbc-mysql")
            .map_err(|e| DbcError::driver_not_found(format!("mysql: failed to start runtime: {e}")))?;
        Ok(Self { runtime: Arc::new(runtime) })
    }
}

impl DatabaseDriver for MySqlDriver {
    fn name(&self) -> &str {
        "mysql"
    }

    fn client_version(&self) -> String {
        "mysql_async (rustls)".to_string()
    }

    fn connect(
        &self,
        options: &ConnectOptions<'_>,
    ) -> std::result::Result<Box<dyn DriverConnection>, DriverError> {
        let opts = build_mysql_opts(options)?;
        let timeout = options.connect_timeout;

        let conn = self.runtime.block_on(async {
            let connecting = Conn::new(opts);
            let connected = match timeout {
                Some(limit) => tokio::time::timeout(limit, connecting).await.map_err(|_| {
                    DriverError::failed(format!(
                        "Timed out connecting to MySQL after {}s",
                        limit.as_secs()
                    ))
                })?,
                None => connecting.await,
            };
            connected.map_err(map_connect_error)
        })?;

        let (major, minor, patch) = conn.server_version();
        tracing::debug!(connection_id = conn.id(), "MySQL connection established");

        Ok(Box::new(MySqlConnection {
            conn: Some(conn),
            runtime: Arc::clone(&self.runtime),
            server_version: format!("{major}.{minor}.{patch}"),
            read_timeout: options.read_timeout,
        }))
    }
}

/// Build MySQL connection options from the connect options
fn build_mysql_opts(options: &ConnectOptions<'_>) -> std::result::Result<OptsBuilder, DriverError> {
    let params = options.params;
    let user = params
        .user
        .as_ref()
        .ok_or_else(|| DriverError::failed("MySQL requires 'user' parameter"))?;

    let mut opts = OptsBuilder::default()
        .user(Some(user))
        .pass(options.password)
        .db_name(params.schema.as_ref());

    opts = match (&params.socket, options.host) {
        // A tunnel rewrites host/port and always wins over a local socket
        (Some(socket), _) if params.tunnel.is_none() => {
            opts.socket(Some(socket.display().to_string())).prefer_socket(true)
        }
        (_, Some(host)) => opts.ip_or_hostname(host).tcp_port(options.port.unwrap_or(DEFAULT_PORT)),
        (_, None) => {
            return Err(DriverError::failed("MySQL requires 'host' or 'socket' parameter"));
        }
    };

    Ok(opts.ssl_opts(build_ssl_opts(params)))
}

fn build_ssl_opts(params: &ConnectionParameters) -> Option<SslOpts> {
    let ssl = &params.ssl;
    if !ssl.mode.requires_tls() {
        return None;
    }

    let mut opts = SslOpts::default();
    if let Some(ca) = &ssl.ca {
        opts = opts.with_root_certs(vec![ca.clone().into()]);
    }
    opts = match ssl.mode {
        SslMode::Required => opts
            .with_danger_accept_invalid_certs(true)
            .with_danger_skip_domain_validation(true),
        SslMode::VerifyCa => opts.with_danger_skip_domain_validation(true),
        _ => opts,
    };
    Some(opts)
}

fn map_connect_error(e: mysql_async::Error) -> DriverError {
    match &e {
        mysql_async::Error::Server(server) if server.code == ER_ACCESS_DENIED_ERROR => {
            DriverError::AccessDenied(server.message.clone())
        }
        mysql_async::Error::Server(server)
            if matches!(server.code, ER_MUST_CHANGE_PASSWORD | ER_MUST_CHANGE_PASSWORD_LOGIN) =>
        {
            DriverError::PasswordExpired(server.message.clone())
        }
        _ => DriverError::failed(format!("Failed to connect to MySQL: {e}")),
    }
}

/// Quote an identifier with backticks
fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

struct MySqlConnection {
    conn: Option<Conn>,
    runtime: Arc<DriverRuntime>,
    server_version: String,
    read_timeout: Option<Duration>,
}

impl MySqlConnection {
    fn query_drop(&mut self, sql: &str) -> std::result::Result<(), DriverError> {
        let read_timeout = self.read_timeout;
        let conn = self.conn.as_mut().ok_or_else(|| DriverError::failed("MySQL connection is closed"))?;
        self.runtime.block_on(async {
            let query = conn.query_drop(sql);
            let finished = match read_timeout {
                Some(limit) => tokio::time::timeout(limit, query).await.map_err(|_| {
                    DriverError::failed(format!("Query exceeded read timeout of {}s", limit.as_secs()))
                })?,
                None => query.await,
            };
            finished.map_err(|e| DriverError::failed(format!("MySQL error: {e}")))
        })
    }
}

impl DriverConnection for MySqlConnection {
    fn execute(&mut self, sql: &str) -> std::result::Result<(), DriverError> {
        self.query_drop(sql)
    }

    fn server_version(&self) -> Option<String> {
        Some(self.server_version.clone())
    }

    fn connection_id(&mut self) -> Option<i64> {
        self.conn.as_ref().map(|c| i64::from(c.id()))
    }

    fn ssl_cipher(&mut self) -> Option<String> {
        let conn = self.conn.as_mut()?;
        let row: Option<(String, String)> = self
            .runtime
            .block_on(conn.query_first("SHOW SESSION STATUS LIKE 'Ssl_cipher'"))
            .ok()?;
        row.map(|(_, cipher)| cipher).filter(|cipher| !cipher.is_empty())
    }

    fn set_schema(&mut self, schema: &str) -> std::result::Result<(), DriverError> {
        self.query_drop(&format!("USE {}", quote_identifier(schema)))
    }

    fn set_autocommit(&mut self, enabled: bool) -> std::result::Result<(), DriverError> {
        self.query_drop(if enabled { "SET autocommit = 1" } else { "SET autocommit = 0" })
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = self.runtime.block_on(conn.disconnect()) {
                tracing::warn!("failed to disconnect from MySQL: {e}");
            }
        }
    }
}

impl Drop for MySqlConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SslOptions;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("sakila"), "`sakila`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_build_opts_requires_user() {
        let params = ConnectionParameters::new("mysql").host("localhost");
        let result = build_mysql_opts(&ConnectOptions::direct(&params, None));
        assert!(matches!(result, Err(DriverError::Failed(ref m)) if m.contains("'user'")));
    }

    #[test]
    fn test_build_opts_requires_endpoint() {
        let params = ConnectionParameters::new("mysql").user("root");
        let result = build_mysql_opts(&ConnectOptions::direct(&params, None));
        assert!(matches!(result, Err(DriverError::Failed(ref m)) if m.contains("'host'")));
    }

    #[test]
    fn test_ssl_opts_follow_mode() {
        let mut params = ConnectionParameters::mysql("localhost", 3306, "root", None);
        assert!(build_ssl_opts(&params).is_none());

        params.ssl = SslOptions { mode: SslMode::Required, ..Default::default() };
        let opts = build_ssl_opts(&params).unwrap();
        assert!(opts.accept_invalid_certs());

        params.ssl.mode = SslMode::VerifyIdentity;
        let opts = build_ssl_opts(&params).unwrap();
        assert!(!opts.accept_invalid_certs());
        assert!(!opts.skip_domain_validation());
    }

    #[test]
    fn test_map_connect_error() {
        let denied = mysql_async::Error::Server(mysql_async::ServerError {
            code: 1045,
            message: "Access denied for user 'root'@'localhost'".to_string(),
            state: "28000".to_string(),
        });
        assert!(map_connect_error(denied).is_access_denied());

        let expired = mysql_async::Error::Server(mysql_async::ServerError {
            code: 1862,
            message: "Your password has expired".to_string(),
            state: "HY000".to_string(),
        });
        assert!(matches!(map_connect_error(expired), DriverError::PasswordExpired(_)));
    }

    // Note: Integration tests require a running MySQL instance
    #[tokio::test]
    async fn test_connect_from_async_context_returns_error() {
        let driver = MySqlDriver::new().unwrap();
        // Nothing listens on port 1
        let params = ConnectionParameters::mysql("127.0.0.1", 1, "root", None);
        let mut options = ConnectOptions::direct(&params, Some("pw"));
        options.connect_timeout = Some(Duration::from_secs(5));

        let result = driver.connect(&options);
        assert!(matches!(result, Err(DriverError::Failed(_))));
        drop(driver);
    }

    #[test]
    #[ignore = "Requires running MySQL instance"]
    fn test_connect_local_server() {
        let driver = MySqlDriver::new().unwrap();
        let params = ConnectionParameters::mysql("127.0.0.1", 3306, "root", None);
        let password = std::env::var("MYSQL_PWD").unwrap_or_default();
        let mut conn = driver.connect(&ConnectOptions::direct(&params, Some(&password))).unwrap();
        assert!(conn.server_version().is_some());
        conn.execute("SELECT 1").unwrap();
        conn.close();
    }
}
