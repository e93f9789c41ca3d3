mod config;
mod db;
mod frame;
mod routes;
mod services;
mod state;
mod storage;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::services::identity::JwtIdentityResolver;
use crate::storage::{MemoryStorage, PgStorage, Storage};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let storage: Arc<dyn Storage> = match config.database_url.as_deref() {
        Some(database_url) => {
            let pool = db::init_pool(database_url, config.db_max_connections)
                .await
                .expect("database init failed");
            Arc::new(PgStorage::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage (nothing will persist)");
            Arc::new(MemoryStorage::new())
        }
    };

    let identity = Arc::new(JwtIdentityResolver::new(&config.jwt_secret, storage.clone()));
    let state = state::AppState::new(storage, identity).with_client_channel_capacity(config.client_channel_capacity);

    let app = routes::app(state, config.frontend_url.as_deref());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, "classroom listening");
    axum::serve(listener, app).await.expect("server failed");
}
