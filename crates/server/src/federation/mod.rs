//! Outbound federation clients.
//! Modules:
//! - registry: per-destination handle cache with single-builder discipline
//! - handle: cert-gated façade over the per-destination transports
//! - transport: transport trait, factory and the default hyper implementation
//! - tls: rustls client configurations built from the credential snapshot
//! - types: server-to-server request and response bodies

pub mod handle;
pub mod registry;
pub mod tls;
pub mod transport;
pub mod types;

pub use handle::ClientHandle;
pub use registry::FederationClientRegistry;
pub use transport::{
    FederationTransport, HttpTransport, HttpTransportFactory, MediaMeta, MediaSink,
    TransportFactory,
};
