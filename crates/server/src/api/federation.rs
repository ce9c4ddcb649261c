//! Topology and credential updates for the federation client registry.

use axum::{Json, extract::State, response::IntoResponse};
use hyper::StatusCode;
use serde_json::json;

use crate::AppResources;
use crate::credentials::CredentialSnapshot;
use crate::domains::DomainInfo;
use crate::error::FederationError;

/// Replace the domain list and rebuild the local domain's client handle.
#[tracing::instrument(skip_all, fields(domains = domains.len()))]
pub async fn put_domains(
    State(resources): State<AppResources>,
    Json(domains): Json<Vec<DomainInfo>>,
) -> impl IntoResponse {
    let local = resources.config.local_domain().to_string();
    match resources.registry.on_domains_update(domains, &local).await {
        Ok(handle) => (
            StatusCode::OK,
            Json(json!({ "destination": local, "clients": handle.len() })),
        ),
        Err(e @ FederationError::BuildTimeout { .. }) => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({ "error": e.to_string() })),
        ),
        Err(e) => {
            tracing::error!("Error rebuilding federation client: {e:?}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

/// Swap in rotated credentials. Handles built from now on use them; the
/// revocation flag takes effect on existing handles immediately.
#[tracing::instrument(skip_all)]
pub async fn put_credentials(
    State(resources): State<AppResources>,
    Json(snapshot): Json<CredentialSnapshot>,
) -> StatusCode {
    resources.registry.credentials().replace(snapshot);
    StatusCode::NO_CONTENT
}
