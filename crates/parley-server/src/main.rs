use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::AppStateInner;
use parley_core::{Clock, CoreConfig, PresenceTracker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let sweep_secs: u64 = std::env::var("PARLEY_SWEEP_INTERVAL_SECS")
        .unwrap_or_else(|_| "30".into())
        .parse()?;
    let config = CoreConfig::from_env();

    // Init database
    let db = parley_db::Database::open(&PathBuf::from(&db_path))?;

    // Stale typing indicators are swept in the background
    let sweeper = PresenceTracker::new(db.clone(), config.clone(), Clock::new());
    tokio::spawn(sweeper.run_sweeper(Duration::from_secs(sweep_secs.max(1))));

    let app = parley_api::router(AppStateInner::new(db, config))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
