//! mmhost daemon
//!
//! Serves predictions for many models from one process, loading each model
//! from the artifact store the first time it is asked for.

use anyhow::{Context, Result};
use clap::Parser;
use mmhost_api::{apply_layers, create_router};
use mmhost_cache::{CacheSettings, LoadBackend, ModelCache};
use mmhost_core::{HostConfig, LogFormat};
use mmhost_dispatch::Dispatcher;
use mmhost_runtime::JsonModelLoader;
use mmhost_store::{scan_dir, Inventory, LocationStore, RetryPolicy, StagingArea};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// mmhost daemon - multi-model inference host
#[derive(Parser, Debug)]
#[command(name = "mmhostd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind the API server
    #[arg(long)]
    address: Option<String>,

    /// Port for the REST API server
    #[arg(long)]
    port: Option<u16>,

    /// Maximum number of resident models
    #[arg(long)]
    cache_capacity: Option<usize>,

    /// Directory of artifacts to register at startup
    #[arg(long)]
    scan_path: Option<PathBuf>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Log format
    #[arg(long, value_parser = ["text", "json"])]
    log_format: Option<String>,
}

impl Args {
    /// Command line flags win over the configuration file
    fn apply(&self, config: &mut HostConfig) {
        if let Some(address) = &self.address {
            config.api.rest_address = address.clone();
        }
        if let Some(port) = self.port {
            config.api.rest_port = port;
        }
        if let Some(capacity) = self.cache_capacity {
            config.cache.capacity = capacity;
        }
        if let Some(path) = &self.scan_path {
            config.store.scan_path = Some(path.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = self.log_format.as_deref() {
            config.logging.format = match format {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            };
        }
    }
}

fn load_config(args: &Args) -> Result<HostConfig> {
    let mut config = match &args.config {
        Some(path) => HostConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => HostConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Install the global subscriber; `RUST_LOG` overrides the configured level
fn init_logging(config: &HostConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid log level")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match config.logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to set subscriber: {}", e))
}

async fn open_inventory(config: &HostConfig) -> Result<Arc<Inventory>> {
    let inventory = match &config.store.inventory_path {
        Some(path) => Inventory::open(path.clone())
            .await
            .with_context(|| format!("opening inventory {}", path.display()))?,
        None => Inventory::new(),
    };

    if let Some(root) = &config.store.scan_path {
        let mut added = 0;
        for record in scan_dir(root).await? {
            if inventory.contains(&record.id).await {
                continue;
            }
            inventory.register(record).await?;
            added += 1;
        }
        info!(root = %root.display(), added = added, "Registered scanned artifacts");
    }

    Ok(Arc::new(inventory))
}

async fn build_dispatcher(config: &HostConfig, inventory: Arc<Inventory>) -> Result<Dispatcher> {
    let staging = StagingArea::new(config.store.staging_path.clone());
    staging
        .init()
        .await
        .with_context(|| format!("preparing staging dir {}", config.store.staging_path.display()))?;

    let backend = LoadBackend {
        inventory,
        store: Arc::new(LocationStore::new()),
        loader: Arc::new(JsonModelLoader::new()),
        staging,
        retry: RetryPolicy::from(&config.store),
    };
    let cache = ModelCache::new(CacheSettings::from(&config.cache), backend);

    Ok(Dispatcher::new(cache, config.dispatch.request_timeout()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!("Starting mmhost daemon v{}", env!("CARGO_PKG_VERSION"));

    let inventory = open_inventory(&config).await?;
    let dispatcher = build_dispatcher(&config, inventory.clone()).await?;

    let router = apply_layers(create_router(dispatcher, inventory.clone()), &config.api);

    let addr: SocketAddr = format!("{}:{}", config.api.rest_address, config.api.rest_port)
        .parse()
        .context("invalid listen address")?;

    info!(
        models = inventory.len().await,
        capacity = config.cache.capacity,
        "API server listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("mmhost daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "mmhostd",
            "--port",
            "9191",
            "--cache-capacity",
            "3",
            "--log-format",
            "json",
        ]);
        let mut config = HostConfig::default();
        args.apply(&mut config);

        assert_eq!(config.api.rest_port, 9191);
        assert_eq!(config.cache.capacity, 3);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.api.rest_address, "0.0.0.0");
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let args = Args::parse_from(["mmhostd", "--cache-capacity", "0"]);
        assert!(load_config(&args).is_err());
    }

    #[tokio::test]
    async fn test_scanned_artifacts_do_not_replace_registrations() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = dir.path().join("artifacts");
        tokio::fs::create_dir_all(&artifacts).await.unwrap();
        tokio::fs::write(artifacts.join("Reno_NV.json"), b"{}").await.unwrap();
        tokio::fs::write(artifacts.join("Provo_UT.json"), b"{}").await.unwrap();

        let inventory_path = dir.path().join("inventory.json");
        {
            let inventory = Inventory::open(inventory_path.clone()).await.unwrap();
            let record = mmhost_core::InventoryRecord::new(
                "Reno_NV".parse().unwrap(),
                mmhost_core::ArtifactLocation::parse("https://models.example.com/reno.json")
                    .unwrap(),
            );
            inventory.register(record).await.unwrap();
        }

        let mut config = HostConfig::default();
        config.store.inventory_path = Some(inventory_path);
        config.store.scan_path = Some(artifacts);

        let inventory = open_inventory(&config).await.unwrap();
        assert_eq!(inventory.len().await, 2);
        let reno = inventory.lookup(&"Reno_NV".parse().unwrap()).await.unwrap();
        assert_eq!(reno.location.scheme(), "https");
    }
}
