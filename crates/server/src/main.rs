use matrix_fedsync::AppResources;
use matrix_fedsync::api::start_webserver;
use matrix_fedsync::bus::{EduPublisher, HttpPublisher, LogPublisher, RetryPolicy, RetryingPublisher};
use matrix_fedsync::config::load_config;
use matrix_fedsync::credentials::{CredentialSnapshot, CredentialStore};
use matrix_fedsync::domains::DomainDirectory;
use matrix_fedsync::federation::{FederationClientRegistry, HttpTransportFactory};
use matrix_fedsync::pipeline::{Pipeline, PipelineStores};
use matrix_fedsync::storage::{
    AtomicSequence, MemoryFriendshipStore, MemoryPresenceStore, MemoryTimelineStore,
};
use std::env;
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "matrix_fedsync=info,hyper=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

fn is_debug_mode() -> bool {
    env::var("RUST_LOG").unwrap_or_default().contains("debug")
        || env::var("RUST_LOG").unwrap_or_default().contains("trace")
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    initialize_tracing();

    let config = Arc::new(load_config()?);
    let local_domain = config.local_domain().to_string();

    // -------- Federation client registry --------
    let credentials = Arc::new(CredentialStore::new(CredentialSnapshot::from_tls_config(
        &config.federation.tls,
    )));
    let directory = Arc::new(DomainDirectory::new(config.federation.domains.clone()));
    let factory = Arc::new(HttpTransportFactory::new(Duration::from_secs(
        config.federation.request_timeout_secs,
    )));
    let registry = Arc::new(FederationClientRegistry::new(
        directory,
        credentials,
        factory,
        config.registry,
    ));
    if let Err(e) = registry.rebuild(&local_domain).await {
        tracing::warn!(error = %e, domain = %local_domain, "initial federation client build failed");
    }

    // -------- Event pipeline --------
    let publisher: Arc<dyn EduPublisher> = match &config.bus.edu_endpoint {
        Some(endpoint) => Arc::new(RetryingPublisher::new(
            HttpPublisher::new(endpoint, config.bus.edu_topic.clone())?,
            RetryPolicy::from(config.bus.retry),
        )),
        None => Arc::new(LogPublisher),
    };
    let stores = PipelineStores {
        timeline: Arc::new(MemoryTimelineStore::default()),
        friendships: Arc::new(MemoryFriendshipStore::default()),
        presence: Arc::new(MemoryPresenceStore::default()),
        sequence: Arc::new(AtomicSequence::default()),
    };
    let pipeline = Arc::new(Pipeline::start(&config, stores, publisher));
    tracing::info!(
        server_names = ?config.server_names,
        instance = config.multi_instance.instance,
        total = config.multi_instance.total,
        room_lanes = config.pipeline.room_lanes,
        user_lanes = config.pipeline.user_lanes,
        "pipeline configuration"
    );

    if is_debug_mode() {
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                tracing::debug!(
                    target = "stats",
                    builds_completed = registry.builds_completed(),
                    domains = registry.directory().len(),
                    "Periodic stats"
                );
            }
        });
    }

    let resources = AppResources {
        config,
        registry,
        pipeline,
    };
    start_webserver(resources).await?;
    Ok(())
}
