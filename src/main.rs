//! Storefront - catalog, basket, checkout and accounts over HTTP

use std::sync::Arc;

use anyhow::Result;
use storefront::{
    api::{self, AppState},
    config::Config,
    publisher::EventPublisher,
    seed,
    store::{MemoryStore, PgStore, Store},
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(PgStore::connect(url, config.max_connections).await?),
        None => {
            warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };
    if config.seed_db {
        seed::seed(store.as_ref()).await?;
    }

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "NATS unavailable, events are only logged");
                None
            }
        },
        None => None,
    };

    let state = AppState::new(store, EventPublisher::new(nats));
    api::session::spawn_sweeper(state.clone(), config.session_idle, config.session_sweep_interval);
    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("storefront listening on 0.0.0.0:{}", config.port);
    axum::serve(listener, app).await?;
    Ok(())
}
