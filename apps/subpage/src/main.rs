mod config;
mod db;
mod errors;
mod models;
mod routes;
mod state;
mod store;
mod subpage;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::PgStore;
use crate::subpage::{FormatRegistry, ModuleRegistry, SubpageEngine};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Subpage API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url, config.db_max_connections).await?;

    // Resolve per-module-type deletion hooks and course-format namers once
    let modules = ModuleRegistry::with_tables(config.module_tables.iter().map(String::as_str))?;
    info!("Module deletion hooks registered: {}", modules.len());
    let formats = FormatRegistry::with_defaults();

    let engine = SubpageEngine::new(Arc::new(PgStore::new(db)), modules, formats);
    let state = AppState {
        engine: Arc::new(engine),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
