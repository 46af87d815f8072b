//! cdbc CLI Entry Point
//!
//! Thin composition root over the library. It provides four subcommands:
//! - `connect` - Open a stored connection profile and report session details
//! - `add` - Save a connection profile
//! - `list` - List stored connection profiles
//! - `drivers` - List registered and loaded drivers
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use cdbc::{
    config, ConfigLocation, ConnectionHandler, ConnectionParameters, DbcError, DriverManager,
    ErrorEnvelope, Metadata, SslMode, SslOptions, StoredConnection, SuccessEnvelope, TunnelOptions,
};

/// cdbc - database connection and driver management
#[derive(Parser)]
#[command(name = "cdbc")]
#[command(about = "Open authenticated, optionally tunneled database connections")]
#[command(version)]
struct Cli {
    /// Enable verbose/debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a stored connection and report session details
    Connect {
        /// Connection profile name
        name: String,

        /// Switch to this schema after connecting
        #[arg(long)]
        schema: Option<String>,

        /// Statements to run after connecting (repeatable)
        #[arg(long = "execute", short = 'e')]
        statements: Vec<String>,

        /// Never prompt for a password
        #[arg(long)]
        no_prompt: bool,
    },

    /// Save a connection profile
    Add(AddArgs),

    /// List stored connection profiles
    List,

    /// List drivers
    Drivers {
        /// Load every registered driver first
        #[arg(long)]
        load: bool,
    },
}

#[derive(Args)]
struct AddArgs {
    /// Connection profile name
    name: String,

    /// Driver name (mysql, postgres, sqlite or a name from the driver directory)
    #[arg(long)]
    driver: String,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    socket: Option<PathBuf>,

    /// Database file (sqlite)
    #[arg(long)]
    file: Option<PathBuf>,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    schema: Option<String>,

    /// disabled, preferred, required, verify-ca or verify-identity
    #[arg(long, default_value = "preferred")]
    ssl_mode: SslMode,

    #[arg(long)]
    ssl_ca: Option<PathBuf>,

    /// Tunnel (SSH) host
    #[arg(long)]
    tunnel_host: Option<String>,

    #[arg(long, requires = "tunnel_host")]
    tunnel_port: Option<u16>,

    #[arg(long, requires = "tunnel_host")]
    tunnel_user: Option<String>,

    #[arg(long, requires = "tunnel_host")]
    tunnel_key: Option<PathBuf>,

    /// Environment variable holding the password
    #[arg(long)]
    password_env: Option<String>,

    /// Save to the global config instead of `.cdbc/config.json`
    #[arg(long)]
    global: bool,
}

impl AddArgs {
    fn into_stored(self) -> StoredConnection {
        let params = ConnectionParameters {
            driver: self.driver,
            host: self.host,
            port: self.port,
            socket: self.socket,
            file: self.file,
            user: self.user,
            schema: self.schema,
            ssl: SslOptions { mode: self.ssl_mode, ca: self.ssl_ca, ..Default::default() },
            tunnel: self.tunnel_host.map(|host| TunnelOptions {
                host,
                port: self.tunnel_port,
                user: self.tunnel_user,
                key_file: self.tunnel_key,
            }),
            options: Default::default(),
        };
        StoredConnection { params, password: None, password_env: self.password_env }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Priority: --verbose flag, then RUST_LOG env var, then default "warn"
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string())
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
        .with_writer(std::io::stderr)
        .init();

    let started = Instant::now();
    let (driver, command, result) = match cli.command {
        Commands::Connect { name, schema, statements, no_prompt } => {
            run_connect(&name, schema.as_deref(), &statements, no_prompt)
        }
        Commands::Add(args) => run_add(args),
        Commands::List => (String::new(), "list", run_list()),
        Commands::Drivers { load } => (String::new(), "drivers", run_drivers(load)),
    };

    let ok = result.is_ok();
    let output = match result {
        Ok(data) => serde_json::to_string(&SuccessEnvelope::new(
            driver,
            command,
            data,
            Metadata::new(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)),
        ))?,
        Err(err) => serde_json::to_string(&ErrorEnvelope::from_error(driver, command, &err))?,
    };
    println!("{output}");

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Build the manager from the merged config files
fn build_manager() -> cdbc::Result<Arc<DriverManager>> {
    let config = config::load_with_precedence()?;
    Ok(Arc::new(DriverManager::with_builtin_drivers(config.settings())))
}

fn prompt_password(params: &ConnectionParameters, force_prompt: bool) -> Option<String> {
    let prompt = if force_prompt {
        format!("Password for {} (previous attempt rejected)", params.host_identifier())
    } else {
        format!("Password for {}", params.host_identifier())
    };
    dialoguer::Password::new()
        .with_prompt(prompt)
        .allow_empty_password(true)
        .interact()
        .ok()
}

fn run_connect(
    name: &str,
    schema: Option<&str>,
    statements: &[String],
    no_prompt: bool,
) -> (String, &'static str, cdbc::Result<serde_json::Value>) {
    let stored = match config::resolve_connection(name) {
        Ok(stored) => stored,
        Err(e) => return (String::new(), "connect", Err(e)),
    };
    let driver = stored.params.driver.clone();

    let result = (|| {
        let manager = build_manager()?;

        let profile_password = stored.resolve_password()?;
        manager.set_password_find(move |_params| profile_password.as_ref().map(|p| p.as_str().to_owned()));
        if !no_prompt {
            manager.set_password_request(prompt_password);
        }

        let wrapper = manager.get_connection(&stored.params, None)?;
        let handler = ConnectionHandler::open(name, wrapper)?;
        if let Some(schema) = schema {
            handler.use_schema(schema)?;
        }
        let executed = handler.execute_script(statements)?;

        let server_version = handler.wrapper().server_version()?;
        let data = json!({
            "name": handler.name(),
            "endpoint": stored.params.host_identifier(),
            "connection_id": handler.id(),
            "server_version": server_version,
            "schema": handler.active_schema().or_else(|| stored.params.schema.clone()),
            "ssl_cipher": handler.ssl_cipher(),
            "autocommit": handler.autocommit(),
            "statements_executed": executed,
            "client_lib_version": manager.client_lib_version(),
        });
        handler.close();
        manager.thread_cleanup();
        Ok::<_, DbcError>(data)
    })();

    (driver, "connect", result)
}

fn run_add(args: AddArgs) -> (String, &'static str, cdbc::Result<serde_json::Value>) {
    let name = args.name.clone();
    let location = if args.global { ConfigLocation::Global } else { ConfigLocation::Local };
    let stored = args.into_stored();
    let driver = stored.params.driver.clone();

    let result = config::save_connection(&name, stored, location).map(|path| {
        json!({ "name": name, "path": path.display().to_string() })
    });
    (driver, "add", result)
}

fn run_list() -> cdbc::Result<serde_json::Value> {
    let connections: Vec<_> = config::list_connections()?
        .into_iter()
        .map(|(name, params)| {
            json!({
                "name": name,
                "driver": params.driver,
                "endpoint": params.host_identifier(),
            })
        })
        .collect();
    Ok(json!({ "connections": connections }))
}

fn run_drivers(load: bool) -> cdbc::Result<serde_json::Value> {
    let manager = build_manager()?;
    if load {
        for name in manager.registered_drivers() {
            if let Err(e) = manager.get_driver(&name) {
                tracing::warn!(driver = %name, "could not load driver: {e}");
            }
        }
    }
    Ok(json!({
        "registered": manager.registered_drivers(),
        "loaded": manager.get_drivers(),
        "client_lib_version": manager.client_lib_version(),
    }))
}
