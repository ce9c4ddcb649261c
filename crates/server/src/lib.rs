//! Federation client registry and sharded event pipeline for a Matrix
//! homeserver.
//!
//! The registry hands out cached, certificate-gated clients for remote
//! federation domains. The pipeline consumes room events, keeps per-user
//! timelines and the cross-domain visibility graph up to date, and announces
//! local users' profiles to domains that can newly see them.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::federation::FederationClientRegistry;
use crate::pipeline::Pipeline;

pub mod api;
pub mod bus;
pub mod config;
pub mod credentials;
pub mod domains;
pub mod error;
pub mod events;
pub mod federation;
pub mod pipeline;
pub mod storage;

#[derive(Clone)]
pub struct AppResources {
    pub config: Arc<AppConfig>,
    pub registry: Arc<FederationClientRegistry>,
    pub pipeline: Arc<Pipeline>,
}
