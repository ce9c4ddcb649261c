//! Internal HTTP surface.
//!
//! - `health` - liveness probe (/healthz)
//! - `ingest` - room event payloads and presence updates from the bus bridge
//!   (/_internal/room_events, /_internal/presence)
//! - `federation` - domain list and credential updates (/_internal/federation/*)

pub mod federation;
pub mod health;
pub mod ingest;

use axum::Router;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

use crate::AppResources;

pub fn router(resources: AppResources) -> Router {
    Router::new()
        .route("/healthz", get(health::health).head(health::health))
        .route("/_internal/room_events", post(ingest::room_events))
        .route("/_internal/presence", post(ingest::presence))
        .route("/_internal/federation/domains", put(federation::put_domains))
        .route(
            "/_internal/federation/credentials",
            put(federation::put_credentials),
        )
        .with_state(resources)
        .layer(TraceLayer::new_for_http())
}

/// Serve the internal API on the configured listen address until the
/// listener fails.
#[tracing::instrument(skip(resources))]
pub async fn start_webserver(resources: AppResources) -> color_eyre::Result<()> {
    let addr = resources.config.listen_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Server running");
    axum::serve(listener, router(resources))
        .await
        .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;
    Ok(())
}
