use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use compulse_chat::config::{Config, StoreBackend};
use compulse_chat::store::{seed, MemoryStore, PgStore, Store};
use compulse_chat::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("compulse_chat=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    let store: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or("DATABASE_URL must be set")?;
            Arc::new(PgStore::connect(url)?)
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; nothing will be persisted");
            Arc::new(MemoryStore::new())
        }
    };

    store.reset_online()?;
    if config.seed_sample_data {
        seed::seed_sample_data(store.as_ref())?;
    }

    let addr = config.bind_addr;
    let state = AppState::start(config, store)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "chat server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
