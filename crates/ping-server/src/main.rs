mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use ping_api::auth::{AppState, AppStateInner};
use ping_db::{BlobStore, Database};
use ping_gateway::connection;
use ping_gateway::dispatcher::Dispatcher;
use ping_sync::{Backend, Services};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ping=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database and blob store
    let db = Arc::new(Database::open(&config.db_path)?);
    let blobs = BlobStore::new(&config.blob_dir, db.clone());
    let services = Services::new(Backend::new(db, blobs));

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner {
        services: services.clone(),
        jwt_secret: config.jwt_secret.clone(),
        feed_limit: config.feed_limit,
    });
    let dispatcher = Dispatcher::new(services, config.jwt_secret.clone(), config.feed_limit);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(dispatcher);

    let app = Router::new()
        .merge(ping_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Ping server listening on {} (db {})", addr, config.db_path.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(dispatcher): State<Dispatcher>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher))
}
