//! Raw bus payload ingest.
//!
//! The process bootstrap forwards each message consumed from the
//! sync-aggregate topic here unchanged, and each presence update to
//! `/_internal/presence`.

use axum::{Json, body::Bytes, extract::State, response::IntoResponse};
use hyper::StatusCode;
use serde_json::json;

use crate::AppResources;
use crate::error::PipelineError;
use crate::events::ClientEvent;
use crate::pipeline::Dispatch;

pub async fn room_events(
    State(resources): State<AppResources>,
    body: Bytes,
) -> impl IntoResponse {
    match resources.pipeline.on_message(&body).await {
        Ok(Dispatch::Routed { lane }) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "routed", "lane": lane })),
        ),
        Ok(Dispatch::Filtered) => (StatusCode::ACCEPTED, Json(json!({ "status": "filtered" }))),
        Ok(Dispatch::Ignored) => (StatusCode::ACCEPTED, Json(json!({ "status": "ignored" }))),
        Err(e @ PipelineError::MalformedMessage(_)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

pub async fn presence(
    State(resources): State<AppResources>,
    Json(event): Json<ClientEvent>,
) -> impl IntoResponse {
    match resources.pipeline.record_presence(event).await {
        Ok(user_id) => (StatusCode::ACCEPTED, Json(json!({ "user_id": user_id }))),
        Err(e @ PipelineError::MalformedMessage(_)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        ),
        Err(e) => {
            tracing::error!("Error caching presence: {e:?}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}
