//! GrantCraft CLI
//!
//! Runs the grant service and the operator tasks around it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use grantcraft_coordinator::{AccountLinker, AllowanceQueries};
use grantcraft_core::{AccountData, Provider, SubjectId};
use grantcraft_ledger::LedgerClient;
use grantcraft_logging::init_logging;
use grantcraft_server::{GrantServer, JwtAuthenticator};
use grantcraft_settings::Settings;
use grantcraft_store::{MemoryStore, RecordStore, SledStore};

/// GrantCraft - DataCap and faucet grants
#[derive(Parser)]
#[command(name = "grantcraft")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to $GRANTCRAFT_CONFIG or ./grantcraft.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Record store directory; records are kept in memory when omitted
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// Write the effective settings to the settings file
    InitConfig,

    /// Link a provider account to a subject and print a token for it
    LinkAccount {
        /// Record store directory
        #[arg(short, long)]
        data_dir: PathBuf,

        /// Account provider (github, google)
        #[arg(short, long, default_value = "github")]
        provider: Provider,

        /// Provider-side unique id
        #[arg(long)]
        id: String,

        /// Display name
        #[arg(short, long)]
        username: String,

        /// Account creation time (RFC 3339)
        #[arg(long)]
        created_at: DateTime<Utc>,
    },

    /// Print a bearer token for an existing subject
    IssueToken {
        subject: String,
    },

    /// Show remaining DataCap of an address
    Remaining {
        address: String,

        /// Read the verifier allowance instead of the client DataCap
        #[arg(long)]
        verifier: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = load_settings(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve { data_dir } => {
            serve(settings, data_dir).await?;
        }
        Commands::InitConfig => {
            settings.save().context("writing settings")?;
        }
        Commands::LinkAccount {
            data_dir,
            provider,
            id,
            username,
            created_at,
        } => {
            let account = AccountData {
                unique_id: id,
                username,
                created_at,
            };
            link_account(&settings, data_dir, provider, account).await?;
        }
        Commands::IssueToken { subject } => {
            let token = authenticator(&settings)?.issue(&SubjectId::new(subject))?;
            println!("{}", token);
        }
        Commands::Remaining { address, verifier } => {
            remaining(&settings, &address, verifier).await?;
        }
    }

    Ok(())
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    let mut settings = match path {
        Some(path) => Settings::load_from(path),
        None => Settings::load_or_default(),
    }
    .context("loading settings")?;
    settings
        .apply_env_overrides()
        .context("applying environment overrides")?;
    Ok(settings)
}

fn open_store(data_dir: Option<PathBuf>) -> Result<Arc<dyn RecordStore>> {
    match data_dir {
        Some(dir) => {
            let store = SledStore::open(&dir)
                .with_context(|| format!("opening record store at {:?}", dir))?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("No --data-dir given; records are lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn authenticator(settings: &Settings) -> Result<JwtAuthenticator> {
    if settings.auth.jwt_secret.is_empty() {
        bail!("auth.jwt_secret is not set");
    }
    Ok(JwtAuthenticator::new(settings.auth.jwt_secret.as_bytes()))
}

async fn serve(settings: Settings, data_dir: Option<PathBuf>) -> Result<()> {
    settings.validate().context("invalid settings")?;
    let store = open_store(data_dir)?;

    info!("Starting GrantCraft service...");
    GrantServer::from_settings(&settings, store)?.run().await?;
    info!("Service stopped");
    Ok(())
}

async fn link_account(
    settings: &Settings,
    data_dir: PathBuf,
    provider: Provider,
    account: AccountData,
) -> Result<()> {
    let auth = authenticator(settings)?;
    let store = open_store(Some(data_dir))?;

    let record = AccountLinker::new(store).link(provider, account).await?;
    println!("subject: {}", record.id);
    println!("token:   {}", auth.issue(&record.id)?);
    Ok(())
}

async fn remaining(settings: &Settings, address: &str, verifier: bool) -> Result<()> {
    let ledger = Arc::new(LedgerClient::new(settings.ledger.client_config()));
    let queries = AllowanceQueries::new(ledger, Arc::new(MemoryStore::new()));

    if verifier {
        let remaining = queries.verifier_remaining(address).await?;
        println!("{}", remaining);
    } else {
        let remaining = queries.account_remaining(address).await?;
        println!("{}", serde_json::to_string_pretty(&remaining)?);
    }
    Ok(())
}
