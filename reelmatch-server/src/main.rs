use std::sync::Arc;

use clap::Parser;
use reelmatch_core::{create_provider, create_store, EmbeddingProvider, ReelmatchConfig, VectorStore};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use reelmatch_server::http::{start_http_server, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "reelmatch.toml")]
    config: String,

    /// Probe the vector store and exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match ReelmatchConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.service.log_level.clone()));
    fmt().with_env_filter(filter).init();

    let store: Arc<dyn VectorStore> = match create_store(&config.store) {
        Ok(s) => Arc::from(s),
        Err(e) => {
            eprintln!("Failed to create vector store: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match store.health().await {
            Ok(v) => println!("✅ Vector store ({}) reachable: {}", store.name(), v),
            Err(e) => {
                println!("❌ Vector store ({}) check failed: {}", store.name(), e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let provider: Arc<dyn EmbeddingProvider> = match create_provider(&config.provider) {
        Ok(p) => Arc::from(p),
        Err(e) => {
            eprintln!("Failed to create embedding provider: {}", e);
            std::process::exit(1);
        }
    };

    if store.dimension() != provider.dimensions() {
        anyhow::bail!(
            "store dimension {} does not match provider dimension {}",
            store.dimension(),
            provider.dimensions()
        );
    }

    tracing::info!(
        store = store.name(),
        provider = provider.name(),
        dimension = store.dimension(),
        "Reelmatch starting"
    );

    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            // keep the sender alive so the server does not see a closed channel
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
        let _ = tx.send(());
    });

    let state = Arc::new(HttpState::new(store, provider, config));
    start_http_server(state, rx).await?;

    Ok(())
}
