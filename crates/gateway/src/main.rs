use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gatehouse_core::ResourceId;
use gatehouse_gateway::cleanup::spawn_cleanup;
use gatehouse_gateway::{AppState, GatewayConfig, router};
use gatehouse_store::models::SecretModel;
use gatehouse_store::{RocksDb, RocksDbConfig};
use gatehouse_vault::Vault;

#[derive(Debug, Parser)]
#[command(name = "gatehouse", about = "Personal resource gateway", version)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, env = "GATEHOUSE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the gateway (the default).
    Serve {
        #[arg(long)]
        bind: Option<SocketAddr>,
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Mint a connect code and print the pairing string.
    Pair,
    /// Register an upstream credential for a resource.
    AddSecret {
        /// Resource id, e.g. `llm:groq`.
        #[arg(long)]
        resource: String,
        /// Display name for the credential.
        #[arg(long)]
        name: String,
        /// The secret value itself.
        #[arg(long, env = "GATEHOUSE_SECRET_VALUE", hide_env_values = true)]
        value: String,
        /// Optional non-secret provider config, JSON.
        #[arg(long)]
        provider_config: Option<String>,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<GatewayConfig> {
    let config = match &cli.config {
        Some(path) => GatewayConfig::from_toml(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    Ok(config)
}

fn open_db(config: &GatewayConfig) -> anyhow::Result<RocksDb> {
    std::fs::create_dir_all(&config.db_path)
        .with_context(|| format!("creating {}", config.db_path.display()))?;
    RocksDb::open(&config.db_path, &RocksDbConfig::default())
        .with_context(|| format!("opening database at {}", config.db_path.display()))
}

fn open_vault(config: &GatewayConfig) -> anyhow::Result<Vault> {
    let secret = config
        .resolve_master_secret()
        .context("master secret is not configured; set GATEHOUSE_MASTER_SECRET")?;
    Vault::new(secret.as_bytes()).context("deriving the vault key")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    match cli.command.unwrap_or(Command::Serve {
        bind: None,
        db_path: None,
    }) {
        Command::Serve { bind, db_path } => {
            if let Some(bind) = bind {
                config.bind_address = bind;
            }
            if let Some(db_path) = db_path {
                config.db_path = db_path;
            }
            serve(config).await
        }
        Command::Pair => {
            let db = open_db(&config)?;
            let generated =
                gatehouse_auth::pairing::generate_pairing(&db, config.public_url_trimmed())?;
            println!("{}", generated.pairing);
            eprintln!("code expires at {}", generated.expires_at);
            Ok(())
        }
        Command::AddSecret {
            resource,
            name,
            value,
            provider_config,
        } => {
            let resource: ResourceId = resource
                .parse()
                .context("resource must look like <type>:<provider>, e.g. llm:groq")?;
            let db = open_db(&config)?;
            let vault = open_vault(&config)?;

            let sealed = vault.seal(value.as_bytes());
            let mut secret =
                SecretModel::new(&resource, &name, sealed.encrypted_key, sealed.key_iv);
            if let Some(raw) = provider_config {
                let parsed: serde_json::Value =
                    serde_json::from_str(&raw).context("provider_config must be JSON")?;
                secret.set_config(&parsed);
            }
            secret.save(&db)?;
            println!("stored credential for {resource}");
            Ok(())
        }
    }
}

async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let db = open_db(&config)?;
    let vault = open_vault(&config)?;
    let registry = config.build_registry()?;
    tracing::info!(
        plugins = registry.len(),
        db = %config.db_path.display(),
        "gatehouse starting"
    );

    let bind_address = config.bind_address;
    let state = AppState::new(db, vault, registry, config);
    let _cleanup = spawn_cleanup(state.clone());

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("binding {bind_address}"))?;
    tracing::info!(%bind_address, "gatehouse listening");
    axum::serve(listener, app).await.context("server error")
}
