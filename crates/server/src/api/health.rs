//! Health check endpoint.

#[tracing::instrument()]
pub async fn health() -> &'static str {
    "ok"
}
