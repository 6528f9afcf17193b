//! mockd - CLI Entry Point

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use mockd::store::{DocumentStore, JsonStore, LOGS};
use mockd::validation::validate_create;
use mockd::{backup, MockAdmin, MockRequest, MockResolver, MockServerConfig};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_CONFIG: &str = include_str!("../demos/default-config.yaml");

#[derive(Parser, Debug)]
#[command(
    name = "mockd",
    about = "Configurable HTTP mock server - mock definitions, response templates and request logs",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mockd.yaml", env = "MOCKD_CONFIG")]
    config: PathBuf,

    /// Store document path (overrides the configuration file)
    #[arg(long, value_name = "PATH", env = "MOCKD_DB_PATH")]
    db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info", env = "MOCKD_LOG_LEVEL")]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print default configuration and exit
    PrintConfig,

    /// Validate a YAML/JSON file of mock definitions
    Validate { file: PathBuf },

    /// Create every mock definition in a YAML/JSON file
    Import { file: PathBuf },

    /// List stored mock definitions
    Mocks,

    /// List request log entries
    Logs,

    /// Delete a mock definition by id
    Delete { id: String },

    /// Resolve one request against the stored mocks
    Resolve {
        /// HTTP method
        method: String,

        /// Request path with optional query string
        url: String,

        /// Request header as "Name: value"
        #[arg(short = 'H', long = "header", value_name = "HEADER")]
        headers: Vec<String>,

        /// Request body (JSON, or sent as a plain string)
        #[arg(long)]
        body: Option<String>,
    },

    /// Back up the request log
    Backup {
        /// Target directory (defaults to backup_dir from the configuration)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &args.command {
        Command::PrintConfig => {
            print!("{DEFAULT_CONFIG}");
            return Ok(());
        }
        Command::Validate { file } => return validate_file(file),
        _ => {}
    }

    // Load configuration
    let mut config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::from_file(&args.config)?
    } else {
        info!("Using default configuration");
        MockServerConfig::default()
    };
    if let Some(db) = args.db {
        config.store.path = db;
    }

    let store: Arc<dyn DocumentStore> = Arc::new(
        JsonStore::open(&config.store.path)
            .await
            .with_context(|| format!("Failed to open store {}", config.store.path.display()))?,
    );
    let admin = MockAdmin::new(Arc::clone(&store));

    match args.command {
        Command::PrintConfig | Command::Validate { .. } => unreachable!("handled before the store is opened"),

        Command::Import { file } => {
            for payload in load_definitions(&file)? {
                match admin.create(payload).await {
                    Ok(mock) => println!("{} {} {}", mock.id, mock.method, mock.path),
                    Err(e) => anyhow::bail!("Import stopped: {e}"),
                }
            }
        }

        Command::Mocks => print_json(&admin.list().await?)?,

        Command::Logs => print_json(&admin.logs().await?)?,

        Command::Delete { id } => print_json(&admin.delete(&id).await?)?,

        Command::Resolve {
            method,
            url,
            headers,
            body,
        } => {
            let request = build_request(&method, &url, &headers, body.as_deref())?;
            let resolver = MockResolver::new(Arc::clone(&store), config.settings.clone());
            let response = resolver.resolve(&request).await.into_response();

            println!("HTTP {}", response.status);
            for (name, value) in &response.headers {
                println!("{name}: {value}");
            }
            println!();
            println!("{}", String::from_utf8_lossy(&response.body_bytes()));

            // The log entry is queued ahead of this read
            store.list(LOGS).await?;
        }

        Command::Backup { dir } => {
            let dir = dir.unwrap_or(config.backup_dir);
            match backup::backup_logs(store.as_ref(), &dir).await? {
                Some(path) => println!("Backup saved to {}", path.display()),
                None => println!("No logs to back up"),
            }
        }
    }

    Ok(())
}

/// Read mock payloads from a YAML or JSON file: a list, or `{mocks: [...]}`.
fn load_definitions(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let document: Value = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    match document {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("mocks") {
            Some(Value::Array(items)) => Ok(items),
            _ => anyhow::bail!("Expected a list of mocks or a `mocks` list in {}", path.display()),
        },
        _ => anyhow::bail!("Expected a list of mocks in {}", path.display()),
    }
}

fn validate_file(path: &Path) -> Result<()> {
    let definitions = load_definitions(path)?;
    let mut invalid = 0;

    for (i, payload) in definitions.iter().enumerate() {
        if let Err(e) = validate_create(payload.clone(), format!("#{i}"), Utc::now()) {
            invalid += 1;
            for detail in &e.details {
                println!("mock {i}: {}: {}", detail.field, detail.message);
            }
        }
    }

    if invalid > 0 {
        anyhow::bail!("{invalid} of {} mocks are invalid", definitions.len());
    }
    println!("Definitions are valid ({} mocks defined)", definitions.len());
    Ok(())
}

fn build_request(method: &str, url: &str, headers: &[String], body: Option<&str>) -> Result<MockRequest> {
    let mut request = MockRequest::from_uri(method.to_ascii_uppercase(), url);

    for header in headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Invalid header {header:?}, expected \"Name: value\""))?;
        request = request.with_header(name.trim(), value.trim());
    }

    if let Some(body) = body {
        let body = serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()));
        request = request.with_body(body);
    }

    Ok(request)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
