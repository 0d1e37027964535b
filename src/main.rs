mod clock;
mod config;
mod db;
mod frame;
mod models;
mod routes;
mod services;
mod state;
mod store;

use std::sync::Arc;

use crate::clock::SystemClock;
use crate::config::Config;
use crate::services::room::RandomCodes;
use crate::store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let port = config.port;

    let store: Arc<dyn Store> = match &config.database {
        Some(db_config) => {
            let pool = db::init_pool(db_config).await.expect("database init failed");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };
    let state = state::AppState::new(config, store, Arc::new(SystemClock), Arc::new(RandomCodes));

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "livepoll listening");
    axum::serve(listener, app).await.expect("server failed");
}
