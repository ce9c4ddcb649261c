use hyper::StatusCode;
use thiserror::Error;

/// Failure reported by a per-destination transport client.
///
/// Passed through [`crate::federation::ClientHandle`] unchanged.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP {status} from remote server: {body}")]
    Http { status: StatusCode, body: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("JSON error: {0}")]
    Json(String),
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
    #[error("Media sink rejected chunk: {0}")]
    Sink(String),
}

#[derive(Debug, Error)]
pub enum FederationError {
    #[error("Timed out after {waited:?} waiting for federation client of {destination}")]
    BuildTimeout {
        destination: String,
        waited: std::time::Duration,
    },
    #[error("Federation client not found for destination {0}")]
    DestinationNotFound(String),
    #[error("Federation request refused: certificate revoked or expired")]
    CertRevoked,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl FederationError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FederationError::BuildTimeout { .. }
                | FederationError::Transport(TransportError::Network(_))
        )
    }
}

/// Errors raised while routing or handling a single pipeline item.
///
/// None of these stop a lane; the worker logs them and moves on.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    #[error("Lane pool {0} is closed")]
    LaneClosed(&'static str),
    #[error("Timeline insert was dropped before an offset was assigned")]
    InsertDropped,
    #[error("Storage error: {0}")]
    Store(String),
    #[error("Unhandled fault: {0}")]
    Fault(String),
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Publish gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}
