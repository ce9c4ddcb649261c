//! Lazily built, cached federation clients keyed by destination.
//!
//! At most one build per destination is ever in progress. The caller that
//! claims the build marker constructs and publishes the handle; everybody
//! else waits for the marker to clear (bounded by a timeout) and then reads
//! the cache. Publishing is a single map insert, so readers see either the
//! previous handle or the new one.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use super::handle::ClientHandle;
use super::transport::{FederationTransport, TransportFactory};
use crate::config::RegistryConfig;
use crate::credentials::CredentialStore;
use crate::domains::{DomainDirectory, DomainInfo};
use crate::error::FederationError;

type InFlight = Arc<DashMap<String, watch::Sender<()>>>;

/// Held by the caller constructing a handle. Dropping it clears the marker,
/// which closes the watch channel and wakes every waiter at once.
struct BuildGuard {
    in_flight: InFlight,
    destination: String,
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.destination);
    }
}

enum Claim {
    Build(BuildGuard),
    Wait(watch::Receiver<()>),
}

pub struct FederationClientRegistry {
    handles: DashMap<String, Arc<ClientHandle>>,
    in_flight: InFlight,
    directory: Arc<DomainDirectory>,
    credentials: Arc<CredentialStore>,
    factory: Arc<dyn TransportFactory>,
    get_timeout: Duration,
    rebuild_timeout: Duration,
    builds_completed: AtomicU64,
}

impl FederationClientRegistry {
    pub fn new(
        directory: Arc<DomainDirectory>,
        credentials: Arc<CredentialStore>,
        factory: Arc<dyn TransportFactory>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            handles: DashMap::new(),
            in_flight: Arc::new(DashMap::new()),
            directory,
            credentials,
            factory,
            get_timeout: config.get_timeout(),
            rebuild_timeout: config.rebuild_timeout(),
            builds_completed: AtomicU64::new(0),
        }
    }

    pub fn directory(&self) -> &Arc<DomainDirectory> {
        &self.directory
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Number of handles constructed since startup.
    pub fn builds_completed(&self) -> u64 {
        self.builds_completed.load(Ordering::Relaxed)
    }

    pub fn is_building(&self, destination: &str) -> bool {
        self.in_flight.contains_key(destination)
    }

    pub fn cached(&self, destination: &str) -> Option<Arc<ClientHandle>> {
        self.handles.get(destination).map(|h| h.value().clone())
    }

    /// Cached handle for `destination`, building it on first use.
    #[tracing::instrument(name = "federation_registry_get", skip(self), fields(destination = %destination))]
    pub async fn get(&self, destination: &str) -> Result<Arc<ClientHandle>, FederationError> {
        if let Some(handle) = self.cached(destination) {
            return Ok(handle);
        }

        let started = Instant::now();
        let result = match self.claim(destination) {
            Claim::Build(guard) => {
                // A build may have finished between the cache miss and the claim.
                match self.cached(destination) {
                    Some(handle) => Ok(handle),
                    None => Ok(self.build_and_publish(guard)),
                }
            }
            Claim::Wait(rx) => {
                self.wait_for(destination, rx, started, self.get_timeout)
                    .await
                    .and_then(|()| {
                        self.cached(destination).ok_or_else(|| {
                            FederationError::DestinationNotFound(destination.to_string())
                        })
                    })
            }
        };

        if let Err(e) = &result {
            tracing::warn!(
                name = "federation_registry.get_failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                destination = %destination,
                error = %e,
                message = "could not obtain federation client"
            );
        }
        result
    }

    /// Unconditionally construct a fresh handle for `destination`, waiting
    /// for any build already in progress to finish first.
    #[tracing::instrument(name = "federation_registry_rebuild", skip(self), fields(destination = %destination))]
    pub async fn rebuild(&self, destination: &str) -> Result<Arc<ClientHandle>, FederationError> {
        let started = Instant::now();
        loop {
            match self.claim(destination) {
                Claim::Build(guard) => {
                    let handle = self.build_and_publish(guard);
                    tracing::info!(
                        name = "federation_registry.rebuilt",
                        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                        destination = %destination,
                        clients = handle.len(),
                        message = "federation client rebuilt"
                    );
                    return Ok(handle);
                }
                Claim::Wait(rx) => {
                    if let Err(e) = self
                        .wait_for(destination, rx, started, self.rebuild_timeout)
                        .await
                    {
                        tracing::warn!(
                            name = "federation_registry.rebuild_failed",
                            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                            destination = %destination,
                            error = %e,
                            message = "gave up waiting to rebuild federation client"
                        );
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Swap in a new domain topology and rebuild the local domain's handle.
    pub async fn on_domains_update(
        &self,
        domains: Vec<DomainInfo>,
        local_domain: &str,
    ) -> Result<Arc<ClientHandle>, FederationError> {
        self.directory.replace(domains);
        self.rebuild(local_domain).await
    }

    fn claim(&self, destination: &str) -> Claim {
        match self.in_flight.entry(destination.to_string()) {
            Entry::Occupied(entry) => Claim::Wait(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, _rx) = watch::channel(());
                entry.insert(tx);
                Claim::Build(BuildGuard {
                    in_flight: self.in_flight.clone(),
                    destination: destination.to_string(),
                })
            }
        }
    }

    async fn wait_for(
        &self,
        destination: &str,
        mut rx: watch::Receiver<()>,
        started: Instant,
        bound: Duration,
    ) -> Result<(), FederationError> {
        let remaining = bound.saturating_sub(started.elapsed());
        // Nothing is ever sent on the channel; `changed` returns once the
        // builder drops its guard.
        match tokio::time::timeout(remaining, rx.changed()).await {
            Ok(_) => Ok(()),
            Err(_) => Err(FederationError::BuildTimeout {
                destination: destination.to_string(),
                waited: bound,
            }),
        }
    }

    /// Construction is synchronous, so a claimed build always runs to
    /// completion and publishes even if the claiming caller goes away.
    fn build_and_publish(&self, guard: BuildGuard) -> Arc<ClientHandle> {
        let handle = Arc::new(self.construct(&guard.destination));
        self.handles.insert(guard.destination.clone(), handle.clone());
        self.builds_completed.fetch_add(1, Ordering::Relaxed);
        drop(guard);
        handle
    }

    fn construct(&self, destination: &str) -> ClientHandle {
        let material = self.credentials.snapshot().resolve();
        let mut clients: HashMap<String, Arc<dyn FederationTransport>> = HashMap::new();

        for info in self.directory.list_all_domains() {
            let Some(host) = self.directory.resolve_host(&info.domain) else {
                tracing::warn!(
                    name = "federation_registry.unresolved_domain",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    domain = %info.domain,
                    message = "destination not found for domain, skipping"
                );
                continue;
            };

            match self.factory.build(&info, &host, &material) {
                Ok(client) => {
                    tracing::debug!(
                        name = "federation_registry.client_built",
                        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                        domain = %info.domain,
                        host = %host,
                        scheme = %info.scheme,
                        message = "built per-destination transport"
                    );
                    clients.insert(host, client);
                }
                Err(e) => {
                    tracing::warn!(
                        name = "federation_registry.client_build_failed",
                        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                        domain = %info.domain,
                        host = %host,
                        error = %e,
                        message = "failed to build per-destination transport, skipping"
                    );
                }
            }
        }

        tracing::info!(
            name = "federation_registry.built",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            destination = %destination,
            clients = clients.len(),
            message = "federation client handle constructed"
        );
        ClientHandle::new(clients, self.credentials.clone())
    }
}
