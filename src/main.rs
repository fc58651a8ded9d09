//! ==============================================================================
//! main.rs - garden hub entry point
//! ==============================================================================
//!
//! purpose:
//!     the hub the enviro device posts to and the dashboard reads from.
//!
//! responsibilities:
//!     - load host.toml and set up logging
//!     - pick the table store (github gists, or in-memory for local runs)
//!     - serve ingestion, the manual editor api and the merged views
//!
//! relationships:
//!     - uses: config.rs (settings), store.rs (backend), service.rs (pipeline)
//!     - uses: http.rs (router)
//!
//! architecture:
//!
//!     ┌──────────────┐  POST /envirodata   ┌─────────────────────────────┐
//!     │ enviro device│ ──────────────────> │                             │
//!     └──────────────┘                     │   http.rs -> service.rs     │
//!     ┌──────────────┐  /api/manual        │     ingest / editor         │
//!     │ dashboard    │ <─────────────────> │     normalize -> merge      │
//!     └──────────────┘  /api/readings      └──────────────┬──────────────┘
//!                                                         │ load / save
//!                                          ┌──────────────┴──────────────┐
//!                                          │ manual.csv  │ enviro.csv    │
//!                                          │   (gist)    │   (gist)      │
//!                                          └─────────────────────────────┘
//!
//! ==============================================================================

use garden_hub::config::{HostConfig, StoreBackend};
use garden_hub::{build_router, GistStore, MemoryStore, ReadingService, ReadingStore};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration, then logging at the configured level
    let config = load_config();
    init_logging(&config);
    config.log_summary();

    // step 2: pick the store
    let store = open_store(&config)?;

    // step 3: serve
    let service = ReadingService::new(store, &config);
    let app = build_router(service);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    tracing::info!("listening on http://{}", config.server.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn load_config() -> HostConfig {
    // config messages go out before the real subscriber exists
    let bootstrap = tracing_subscriber::fmt().with_env_filter("info").finish();
    tracing::subscriber::with_default(bootstrap, HostConfig::load_or_default)
}

fn init_logging(config: &HostConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();
}

fn open_store(config: &HostConfig) -> Result<Arc<dyn ReadingStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; readings are lost on restart");
            Ok(Arc::new(MemoryStore::with_default_tables()))
        }
        StoreBackend::Gist => {
            let token = std::env::var(&config.store.token_env).with_context(|| {
                format!("gist store needs a token in ${}", config.store.token_env)
            })?;
            for (name, blob) in [("manual", &config.store.manual), ("automated", &config.store.automated)] {
                if blob.gist_id.is_empty() {
                    anyhow::bail!("store.{}.gist_id is not set", name);
                }
            }
            let store = GistStore::new(&config.store, token)?;
            tracing::info!(
                manual = %config.store.manual.gist_id,
                automated = %config.store.automated.gist_id,
                "using gist store"
            );
            Ok(Arc::new(store))
        }
    }
}
