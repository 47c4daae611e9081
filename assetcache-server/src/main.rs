use anyhow::Context;
use assetcache_core::{CacheClient, CacheKey, GetResult};
use assetcache_server::CacheServer;
use assetcache_server::config::{self, ConfigOverrides};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "assetcache")]
#[command(about = "On-disk LRU cache server for build artifacts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Server {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// Cache root directory
        #[arg(long)]
        root: Option<PathBuf>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Maximum cache size in megabytes
        #[arg(long)]
        max_size_mb: Option<u64>,

        /// Fraction of the maximum size eviction drains down to
        #[arg(long)]
        free_fraction: Option<f64>,
    },
    /// Fetch an artifact from a running server
    Get {
        #[arg(short, long, default_value = "127.0.0.1:8125")]
        server: String,

        id: Uuid,

        hash: String,

        /// Write the artifact here instead of reporting its size
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Upload an artifact to a running server
    Put {
        #[arg(short, long, default_value = "127.0.0.1:8125")]
        server: String,

        id: Uuid,

        hash: String,

        input: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "assetcache_server=info,assetcache_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Server {
            config,
            root,
            port,
            max_size_mb,
            free_fraction,
        } => {
            let overrides = ConfigOverrides {
                root_path: root,
                port,
                max_cache_size_mb: max_size_mb,
                cache_free_fraction: free_fraction,
            };
            run_server(config.as_deref(), &overrides).await
        }
        Commands::Get {
            server,
            id,
            hash,
            output,
        } => run_get(&server, id, &hash, output).await,
        Commands::Put {
            server,
            id,
            hash,
            input,
        } => run_put(&server, id, &hash, input).await,
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run_server(config_path: Option<&str>, overrides: &ConfigOverrides) -> anyhow::Result<()> {
    let cfg = config::load(config_path, overrides).context("failed to load config")?;
    tracing::info!(
        "Starting Assetcache server: root {:?}, port {}, max size {} MB",
        cfg.root_path,
        cfg.port,
        cfg.max_cache_size_mb
    );

    let server = CacheServer::new(cfg).await.context("failed to open cache")?;
    server.start().await.context("failed to start server")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("Shutting down server...");
    server.stop().await?;
    server.store().wait_for_background_tasks().await;
    Ok(())
}

async fn run_get(
    server: &str,
    id: Uuid,
    hash: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let key = CacheKey::new(id, hash)?;
    let mut client = CacheClient::connect(server)
        .await
        .with_context(|| format!("failed to connect to {}", server))?;

    match client.get(&key).await? {
        GetResult::Miss { .. } => tracing::info!("Cache miss: {}", key),
        GetResult::Hit { data, .. } => match output {
            Some(path) => {
                tokio::fs::write(&path, &data)
                    .await
                    .with_context(|| format!("failed to write {:?}", path))?;
                tracing::info!("Cache hit: {} ({} bytes) written to {:?}", key, data.len(), path);
            }
            None => tracing::info!("Cache hit: {} ({} bytes)", key, data.len()),
        },
    }

    client.close().await?;
    Ok(())
}

async fn run_put(server: &str, id: Uuid, hash: &str, input: PathBuf) -> anyhow::Result<()> {
    let key = CacheKey::new(id, hash)?;
    let data = tokio::fs::read(&input)
        .await
        .with_context(|| format!("failed to read {:?}", input))?;

    let mut client = CacheClient::connect(server)
        .await
        .with_context(|| format!("failed to connect to {}", server))?;
    client.put(&key, &data).await?;
    client.close().await?;

    tracing::info!("Sent {} ({} bytes)", key, data.len());
    Ok(())
}
