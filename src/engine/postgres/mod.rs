//! `PostgreSQL` Driver Implementation
//!
//! This module implements the `DatabaseDriver` trait for `PostgreSQL` databases.
//!
//! # Features
//! - Client-server connections via TCP (or a Unix socket directory)
//! - Access-denied detection (SQLSTATE 28P01 / 28000) for the manager's retry logic
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` (async driver) behind the blocking driver interface
//! - The connection future is spawned on the driver's runtime
//! - Plain-text connections only: TLS-requiring SSL modes are rejected
//! - Autocommit off is emulated with an explicit `BEGIN`

use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls};

use crate::engine::runtime::DriverRuntime;
use crate::engine::{ConnectOptions, DatabaseDriver, DriverConnection, DriverError};
use crate::error::{DbcError, Result};

const DEFAULT_PORT: u16 = 5432;

/// `PostgreSQL` driver
pub struct PostgresDriver {
    runtime: Arc<DriverRuntime>,
}

impl PostgresDriver {
    /// Create the driver and its runtime
    pub fn new() -> Result<Self> {
        let runtime = DriverRuntime::new("cdbc-postgres").map_err(|e| {
            DbcError::driver_not_found(format!("postgres: failed to start runtime: {e}"))
        })?;
        Ok(Self { runtime: Arc::new(runtime) })
    }
}

impl DatabaseDriver for PostgresDriver {
    fn name(&self) -> &str {
        "postgres"
    }

    fn client_version(&self) -> String {
        "tokio-postgres 0.7".to_string()
    }

    fn connect(
        &self,
        options: &ConnectOptions<'_>,
    ) -> std::result::Result<Box<dyn DriverConnection>, DriverError> {
        if options.params.ssl.mode.requires_tls() {
            return Err(DriverError::failed(format!(
                "PostgreSQL driver does not support ssl mode '{:?}'",
                options.params.ssl.mode
            )));
        }
        let pg_config = build_pg_config(options)?;

        let (client, server_version) = self.runtime.block_on(async {
            let (client, connection) = pg_config.connect(NoTls).await.map_err(map_connect_error)?;

            // Note: Connection errors are not logged to prevent credential leakage
            tokio::spawn(async move {
                let _ = connection.await;
            });

            let row = client
                .query_one("SHOW server_version", &[])
                .await
                .map_err(|e| DriverError::failed(format!("Failed to query PostgreSQL version: {e}")))?;
            let version: String = row.get(0);
            Ok::<_, DriverError>((client, version))
        })?;

        tracing::debug!(server_version = %server_version, "PostgreSQL connection established");
        Ok(Box::new(PostgresConnection {
            client: Some(client),
            runtime: Arc::clone(&self.runtime),
            server_version,
            read_timeout: options.read_timeout,
            in_transaction: false,
        }))
    }
}

/// Build `PostgreSQL` connection config from the connect options
fn build_pg_config(options: &ConnectOptions<'_>) -> std::result::Result<Config, DriverError> {
    let params = options.params;
    let user = params
        .user
        .as_ref()
        .ok_or_else(|| DriverError::failed("PostgreSQL requires 'user' parameter"))?;

    let mut pg_config = Config::new();
    match (&params.socket, options.host) {
        (Some(socket), _) if params.tunnel.is_none() => {
            pg_config.host_path(socket);
        }
        (_, Some(host)) => {
            pg_config.host(host);
        }
        (_, None) => {
            return Err(DriverError::failed("PostgreSQL requires 'host' or 'socket' parameter"));
        }
    }

    pg_config
        .port(options.port.unwrap_or(DEFAULT_PORT))
        .user(user)
        .dbname(params.schema.as_deref().unwrap_or("postgres"))
        .application_name("cdbc");
    if let Some(timeout) = options.connect_timeout {
        pg_config.connect_timeout(timeout);
    }
    if let Some(password) = options.password {
        pg_config.password(password);
    }

    Ok(pg_config)
}

fn map_connect_error(e: tokio_postgres::Error) -> DriverError {
    match e.code() {
        Some(code)
            if *code == SqlState::INVALID_PASSWORD
                || *code == SqlState::INVALID_AUTHORIZATION_SPECIFICATION =>
        {
            DriverError::AccessDenied(e.as_db_error().map_or_else(|| e.to_string(), |db| db.message().to_string()))
        }
        _ => DriverError::failed(format!("Failed to connect to PostgreSQL: {e}")),
    }
}

/// Quote an identifier with double quotes
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

struct PostgresConnection {
    client: Option<Client>,
    runtime: Arc<DriverRuntime>,
    server_version: String,
    read_timeout: Option<Duration>,
    in_transaction: bool,
}

impl PostgresConnection {
    fn batch_execute(&mut self, sql: &str) -> std::result::Result<(), DriverError> {
        let read_timeout = self.read_timeout;
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| DriverError::failed("PostgreSQL connection is closed"))?;
        self.runtime.block_on(async {
            let query = client.batch_execute(sql);
            let finished = match read_timeout {
                Some(limit) => tokio::time::timeout(limit, query).await.map_err(|_| {
                    DriverError::failed(format!("Query exceeded read timeout of {}s", limit.as_secs()))
                })?,
                None => query.await,
            };
            finished.map_err(|e| DriverError::failed(format!("PostgreSQL error: {e}")))
        })
    }
}

impl DriverConnection for PostgresConnection {
    fn execute(&mut self, sql: &str) -> std::result::Result<(), DriverError> {
        self.batch_execute(sql)
    }

    fn server_version(&self) -> Option<String> {
        Some(self.server_version.clone())
    }

    fn connection_id(&mut self) -> Option<i64> {
        let client = self.client.as_ref()?;
        let row = self.runtime.block_on(client.query_one("SELECT pg_backend_pid()", &[])).ok()?;
        row.try_get::<_, i32>(0).ok().map(i64::from)
    }

    fn set_schema(&mut self, schema: &str) -> std::result::Result<(), DriverError> {
        self.batch_execute(&format!("SET search_path TO {}", quote_identifier(schema)))
    }

    fn set_autocommit(&mut self, enabled: bool) -> std::result::Result<(), DriverError> {
        match (enabled, self.in_transaction) {
            (true, true) => self.batch_execute("COMMIT")?,
            (false, false) => self.batch_execute("BEGIN")?,
            _ => return Ok(()),
        }
        self.in_transaction = !enabled;
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the client ends the spawned connection task
        if self.client.take().is_some() {
            tracing::debug!("PostgreSQL connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionParameters, SslMode, SslOptions};

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("public"), "\"public\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_build_config_requires_user() {
        let params = ConnectionParameters::new("postgres").host("localhost");
        let result = build_pg_config(&ConnectOptions::direct(&params, None));
        assert!(matches!(result, Err(DriverError::Failed(ref m)) if m.contains("'user'")));
    }

    #[test]
    fn test_build_config_uses_rewritten_endpoint() {
        let params = ConnectionParameters::postgres("db.internal", 5432, "app", "shop");
        let mut opts = ConnectOptions::direct(&params, Some("pw"));
        opts.host = Some("127.0.0.1");
        opts.port = Some(40123);

        let config = build_pg_config(&opts).unwrap();
        assert_eq!(config.get_ports(), &[40123]);
        assert_eq!(config.get_dbname(), Some("shop"));
        assert_eq!(config.get_user(), Some("app"));
    }

    #[test]
    fn test_tls_modes_rejected() {
        let driver = PostgresDriver::new().unwrap();
        let params = ConnectionParameters::postgres("localhost", 5432, "app", "shop")
            .ssl(SslOptions { mode: SslMode::Required, ..Default::default() });
        let result = driver.connect(&ConnectOptions::direct(&params, None));
        assert!(matches!(result, Err(DriverError::Failed(ref m)) if m.contains("ssl mode")));
    }

    #[test]
    fn test_zero_connect_timeout_is_unset() {
        let params = ConnectionParameters::postgres("localhost", 5432, "app", "shop");
        let mut opts = ConnectOptions::direct(&params, None);
        assert_eq!(build_pg_config(&opts).unwrap().get_connect_timeout(), Some(&Duration::from_secs(60)));

        opts.connect_timeout = None;
        assert_eq!(build_pg_config(&opts).unwrap().get_connect_timeout(), None);
    }

    #[tokio::test]
    async fn test_connect_from_async_context_returns_error() {
        let driver = PostgresDriver::new().unwrap();
        // Nothing listens on port 1
        let params = ConnectionParameters::postgres("127.0.0.1", 1, "app", "shop");
        let mut options = ConnectOptions::direct(&params, Some("pw"));
        options.connect_timeout = Some(Duration::from_secs(5));

        let result = driver.connect(&options);
        assert!(matches!(result, Err(DriverError::Failed(_))));
        drop(driver);
    }

    #[test]
    #[ignore = "Requires running PostgreSQL instance"]
    fn test_connect_local_server() {
        let driver = PostgresDriver::new().unwrap();
        let params = ConnectionParameters::postgres("127.0.0.1", 5432, "postgres", "postgres");
        let password = std::env::var("PGPASSWORD").unwrap_or_default();
        let mut conn = driver.connect(&ConnectOptions::direct(&params, Some(&password))).unwrap();
        assert!(conn.server_version().is_some());
        assert!(conn.connection_id().is_some());
        conn.close();
    }
}
