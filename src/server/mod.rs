/// REST API server for the audit ledger.
///
/// The write surface is a single capture endpoint; everything else is
/// read-only queries plus the operator actions (manual batch submission,
/// integrity checks). Anchoring itself runs in the background worker, so
/// capture latency never includes network round-trips.
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::anchor::AnchorClient;
use crate::config::Config;
use crate::store::Database;

/// Shared application state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: Database,
    /// Runtime configuration.
    pub config: Config,
    /// Anchor orchestration client.
    pub anchor: AnchorClient,
}

/// Build the Axum application with all routes and middleware.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::event_routes())
        .merge(routes::batch_routes())
        .merge(routes::verification_routes())
        .with_state(Arc::new(state))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the API server.
pub async fn serve(state: AppState, addr: &str) -> crate::error::Result<()> {
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(crate::error::AuditError::Io)?;

    tracing::info!("Audit ledger API listening on {addr}");

    axum::serve(listener, app)
        .await
        .map_err(crate::error::AuditError::Io)?;

    Ok(())
}
