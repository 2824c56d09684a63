//! signflow: HTTP server for the signing workflow

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use signflow::config::{Config, StorageBackend};
use signflow::http::{create_router, AppState};
use signflow::{
    DocumentVersionStore, FontCaptionRenderer, MemoryDocumentStore, MemorySignerStore,
    SignatureCompositor, SignerStore, SigningWorkflow, SqliteStore, TokenCache,
};

#[derive(Parser)]
#[command(name = "signflow")]
#[command(about = "Document versioning and signing workflow server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "signflow.toml")]
    config: PathBuf,

    /// HTTP port (overrides config file)
    #[arg(long, env = "SIGNFLOW_HTTP_PORT")]
    http_port: Option<u16>,

    /// Data directory
    #[arg(short, long, env = "SIGNFLOW_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Storage backend: memory or sqlite
    #[arg(long, env = "SIGNFLOW_STORAGE")]
    storage: Option<String>,

    /// Bearer key for administrative routes
    #[arg(long, env = "SIGNFLOW_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Caption font
    #[arg(long, env = "SIGNFLOW_FONT")]
    font: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("signflow=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting signflow");
    info!("Config file: {}", cli.config.display());

    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        info!("Config file not found, using defaults");
        Config::default()
    };

    // Apply CLI overrides
    if let Some(port) = cli.http_port {
        config.server.http_port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    if let Some(storage) = cli.storage {
        config.storage.backend = match storage.to_lowercase().as_str() {
            "memory" => StorageBackend::Memory,
            "sqlite" => StorageBackend::Sqlite,
            other => anyhow::bail!("unknown storage backend: {}", other),
        };
    }
    if let Some(api_key) = cli.api_key {
        config.auth.api_key = Some(api_key);
    }
    if let Some(font) = cli.font {
        config.caption.font_path = font;
    }

    let documents: Arc<dyn DocumentVersionStore>;
    let signers: Arc<dyn SignerStore>;
    match config.storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; data is lost on restart");
            documents = Arc::new(MemoryDocumentStore::new());
            signers = Arc::new(MemorySignerStore::new());
        }
        StorageBackend::Sqlite => {
            info!("Data dir: {}", config.storage.data_dir.display());
            let store = Arc::new(
                SqliteStore::open_with_pool_size(&config.storage.data_dir, config.storage.pool_size)
                    .context("Failed to open SQLite store")?,
            );
            documents = store.clone();
            signers = store;
        }
    }

    let renderer = FontCaptionRenderer::from_file(&config.caption.font_path, config.caption.style.clone())
        .context("Failed to load caption font")?;
    let compositor = Arc::new(SignatureCompositor::new(
        Arc::new(renderer),
        config.caption.style.date_format.clone(),
    ));

    let tokens = Arc::new(TokenCache::new(
        config.tokens.used_retention(),
        config.tokens.purge_interval(),
    ));

    // Periodic purge of redeemed tokens
    {
        let tokens = tokens.clone();
        let interval = config.tokens.purge_interval().max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tokens.purge_used();
            }
        });
    }

    let workflow = SigningWorkflow::new(documents, signers, tokens, compositor);

    if config.auth.key().is_none() {
        warn!("No API key configured; administrative routes are open");
    }
    let state = AppState::new(workflow, config.auth.key(), config.server.max_body_bytes);
    let app = create_router(state);

    let ip = config
        .server
        .bind
        .parse::<std::net::IpAddr>()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;
    let addr = SocketAddr::new(ip, config.server.http_port);
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
