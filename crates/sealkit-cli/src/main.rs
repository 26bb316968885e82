//! `sealkit` CLI — operator tooling for per-tenant integration DEKs.
//!
//! Talks to the same `PostgreSQL` tables the application uses, through
//! `sealkit-core`. Never prints plaintext secrets; the only key material it
//! ever writes to stdout is a freshly generated DEK from `generate-dek`.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sealkit_core::cipher::generate_dek;
use sealkit_core::{AuthType, FieldSchema, KeyManagerHandle, Scope};
use sealkit_storage::PostgresStore;
use tracing::info;

use crate::config::CliConfig;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";

/// sealkit — envelope encryption for integration secrets.
#[derive(Parser)]
#[command(
    name = "sealkit",
    version,
    about = "sealkit CLI — initialize, rotate, and re-wrap integration DEKs",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         DATABASE_URL             PostgreSQL connection string\n  \
         SEALKIT_KEK              Current master key\n  \
         SEALKIT_NEW_KEK          Replacement master key (rewrap-kek)\n  \
         SEALKIT_LOG_LEVEL        Log filter (default: warn)\n  \
         SEALKIT_UPDATE_RETRIES   Retries after concurrent writes (default: 3)\n\n\
         {DIM}Examples:{RESET}\n  \
         sealkit init-integration --integration slack\n  \
         sealkit init-account --integration slack --tenant acme\n  \
         sealkit rotate-dek --integration slack --tenant acme\n  \
         sealkit fields --auth-type oauth_2"
    ),
)]
struct Cli {
    /// `PostgreSQL` connection string (overrides `DATABASE_URL`).
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Log filter (overrides `SEALKIT_LOG_LEVEL`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a new random DEK (base64). Does not touch the database.
    GenerateDek,
    /// Give an existing integration row its first DEK.
    InitIntegration {
        #[arg(long)]
        integration: String,
    },
    /// Give an existing account row its first DEK.
    InitAccount {
        #[arg(long)]
        integration: String,
        #[arg(long)]
        tenant: String,
    },
    /// Rotate a row's DEK, re-encrypting its config.
    RotateDek {
        #[arg(long)]
        integration: String,
        /// Rotate the tenant's account row instead of the integration row.
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Re-wrap a row's DEK from `SEALKIT_KEK` to `SEALKIT_NEW_KEK`.
    RewrapKek {
        #[arg(long)]
        integration: String,
        /// Re-wrap the tenant's account row instead of the integration row.
        #[arg(long)]
        tenant: Option<String>,
    },
    /// List the secret fields stored for an auth type.
    Fields {
        /// `oauth_2`, `api_key`, or `bot_token`.
        #[arg(long)]
        auth_type: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = CliConfig::from_env().with_overrides(cli.database_url, cli.log_level);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    match run(&config, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{RED}{BOLD}✗ Error:{RESET} {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &CliConfig, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::GenerateDek => {
            println!("{}", generate_dek().to_base64().as_str());
            Ok(())
        }
        Commands::Fields { auth_type } => cmd_fields(&auth_type),
        Commands::InitIntegration { integration } => {
            let handle = connect(config).await?;
            handle
                .initialize_integration_dek(&integration)
                .await
                .with_context(|| format!("initializing integration '{integration}'"))?;
            success(&format!("Initialized DEK for integration '{integration}'"));
            Ok(())
        }
        Commands::InitAccount {
            integration,
            tenant,
        } => {
            let handle = connect(config).await?;
            handle
                .initialize_account_dek(&integration, &tenant)
                .await
                .with_context(|| format!("initializing account '{tenant}' on '{integration}'"))?;
            success(&format!(
                "Initialized DEK for tenant '{tenant}' on integration '{integration}'"
            ));
            Ok(())
        }
        Commands::RotateDek {
            integration,
            tenant,
        } => cmd_rotate(config, &integration, tenant.as_deref()).await,
        Commands::RewrapKek {
            integration,
            tenant,
        } => cmd_rewrap(config, &integration, tenant.as_deref()).await,
    }
}

async fn connect(config: &CliConfig) -> Result<KeyManagerHandle> {
    let kek = config.require_kek()?;
    let url = config.require_database_url()?;
    let store = PostgresStore::connect(url)
        .await
        .context("connecting to the database")?;
    info!("connected to storage");

    KeyManagerHandle::builder()
        .store(Arc::new(store))
        .kek(kek)
        .options(config.options())
        .build()
        .context("configuring key managers")
}

async fn cmd_rotate(config: &CliConfig, integration: &str, tenant: Option<&str>) -> Result<()> {
    let handle = connect(config).await?;
    match tenant {
        Some(tenant) => {
            // Only the built-in DEK lifecycle is needed; the auth type does not matter.
            handle
                .account(AuthType::ApiKey, integration, tenant)
                .issue_new_dek()
                .await
                .with_context(|| format!("rotating account '{tenant}' on '{integration}'"))?;
            success(&format!(
                "Rotated DEK for tenant '{tenant}' on integration '{integration}'"
            ));
        }
        None => {
            handle
                .integration(AuthType::ApiKey, integration)
                .issue_new_dek()
                .await
                .with_context(|| format!("rotating integration '{integration}'"))?;
            success(&format!("Rotated DEK for integration '{integration}'"));
        }
    }
    Ok(())
}

async fn cmd_rewrap(config: &CliConfig, integration: &str, tenant: Option<&str>) -> Result<()> {
    let new_kek = config.require_new_kek()?;
    let handle = connect(config).await?;
    match tenant {
        Some(tenant) => {
            handle
                .rewrap_account_kek(integration, tenant, &new_kek)
                .await
                .with_context(|| format!("re-wrapping account '{tenant}' on '{integration}'"))?;
            success(&format!(
                "Re-wrapped DEK for tenant '{tenant}' on integration '{integration}'"
            ));
        }
        None => {
            handle
                .rewrap_integration_kek(integration, &new_kek)
                .await
                .with_context(|| format!("re-wrapping integration '{integration}'"))?;
            success(&format!("Re-wrapped DEK for integration '{integration}'"));
        }
    }
    Ok(())
}

fn cmd_fields(auth_type: &str) -> Result<()> {
    let auth_type: AuthType = auth_type.parse()?;
    let schema = FieldSchema::new();
    for scope in [Scope::Integration, Scope::Account] {
        let fields = schema.fields(auth_type, scope);
        if fields.is_empty() {
            println!("{scope}: {DIM}(none){RESET}");
        } else {
            println!("{scope}: {}", fields.join(", "));
        }
    }
    Ok(())
}

fn success(msg: &str) {
    println!("{GREEN}{BOLD}✓{RESET} {msg}");
}
