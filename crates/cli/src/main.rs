//! Operator CLI for Portrait.

mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use portrait_core::IdentityKey;
use portrait_core::config::AppConfig;
use portrait_core::filename::stem_of;
use portrait_engine::{AssignResult, CancellationToken, Engine, metrics};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "portraitctl")]
#[command(about = "Operator CLI for Portrait photo assignments")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "PORTRAIT_CONFIG",
        default_value = "config/portrait.toml"
    )]
    config: String,

    /// Print engine metrics to stderr after the command
    #[arg(long, global = true, default_value_t = false)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pair an identity with an unclaimed resource
    Assign {
        identity_key: String,
        resource_key: String,
    },
    /// Undo the assignment of an identity
    Reset { identity_key: String },
    /// Delete an identity, undoing its assignment first
    DeleteIdentity { identity_key: String },
    /// Show an identity and whether it has a resource
    Verify { identity_key: String },
    /// List unclaimed resources
    List {
        /// Page number, starting at 1
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        page: i64,
        /// Items per page (defaults to the configured page size)
        #[arg(long, allow_negative_numbers = true)]
        page_size: Option<i64>,
    },
    /// Create or update an identity
    RegisterIdentity {
        identity_key: String,
        full_name: String,
        /// External registration code
        #[arg(long)]
        registration_no: Option<String>,
    },
    /// Record an original already placed in the pending area
    RegisterResource {
        /// Path relative to the pending directory
        pending_path: String,
        /// Resource key (defaults to the file stem)
        #[arg(long)]
        key: Option<String>,
    },
    /// Delete an unclaimed resource and its original
    DeleteResource { resource_key: String },
    /// Show identity and resource totals
    Stats,
    /// Check that the metadata store and storage are reachable
    Health,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let engine = Engine::from_config(config)
        .await
        .context("failed to initialize assignment engine")?;

    let status = run(&engine, cli.command).await?;

    if cli.metrics {
        eprint!("{}", metrics::render());
    }
    Ok(status)
}

fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if Path::new(path).exists() {
        tracing::debug!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    figment
        .merge(Env::prefixed("PORTRAIT_").ignore(&["config"]).split("__"))
        .extract()
        .context("failed to load configuration")
}

async fn run(engine: &Engine, command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Assign {
            identity_key,
            resource_key,
        } => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            let watcher = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, abandoning assignment");
                    on_interrupt.cancel();
                }
            });
            let result = engine
                .assign_resource_with_cancel(&identity_key, &resource_key, cancel)
                .await;
            watcher.abort();
            render(result)
        }
        Commands::Reset { identity_key } => render(
            engine
                .reset_assignment(&identity_key)
                .await
                .map(|()| json!({ "identity_key": normalized(&identity_key), "reset": true })),
        ),
        Commands::DeleteIdentity { identity_key } => render(
            engine
                .delete_identity(&identity_key)
                .await
                .map(|()| json!({ "identity_key": normalized(&identity_key), "deleted": true })),
        ),
        Commands::Verify { identity_key } => render(engine.verify_identity(&identity_key).await),
        Commands::List { page, page_size } => {
            render(engine.list_unclaimed_resources(page, page_size).await)
        }
        Commands::RegisterIdentity {
            identity_key,
            full_name,
            registration_no,
        } => render(
            engine
                .register_identity(&identity_key, &full_name, registration_no.as_deref())
                .await,
        ),
        Commands::RegisterResource { pending_path, key } => {
            let key = key.unwrap_or_else(|| stem_of(&pending_path).to_string());
            render(engine.register_resource(&key, &pending_path).await)
        }
        Commands::DeleteResource { resource_key } => render(
            engine
                .delete_resource(&resource_key)
                .await
                .map(|()| json!({ "resource_key": resource_key.trim(), "deleted": true })),
        ),
        Commands::Stats => render(engine.assignment_stats().await),
        Commands::Health => render(
            engine
                .health_check()
                .await
                .map(|()| json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") })),
        ),
    }
}

/// Identity key as stored, for echoing back after a successful command.
fn normalized(raw: &str) -> String {
    IdentityKey::parse(raw)
        .map(|key| key.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn render<T: Serialize>(result: AssignResult<T>) -> Result<ExitCode> {
    match result {
        Ok(value) => output::print_json(&value),
        Err(err) => {
            tracing::debug!(error = %err, code = err.code(), "command failed");
            output::print_error(&err)
        }
    }
}
