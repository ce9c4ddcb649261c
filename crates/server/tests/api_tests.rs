//! Internal HTTP API.

mod common;

use axum_test::TestServer;
use common::{StubFactory, domain, member_event, message_event, new_room_event, presence_event};
use matrix_fedsync::AppResources;
use matrix_fedsync::api::router;
use matrix_fedsync::bus::LogPublisher;
use matrix_fedsync::config::{
    AppConfig, BusConfig, FederationConfig, MultiInstanceConfig, PipelineConfig, RegistryConfig,
};
use matrix_fedsync::credentials::{CredentialSnapshot, CredentialStore};
use matrix_fedsync::domains::DomainDirectory;
use matrix_fedsync::federation::FederationClientRegistry;
use matrix_fedsync::pipeline::{Pipeline, PipelineStores};
use matrix_fedsync::storage::{
    AtomicSequence, MemoryFriendshipStore, MemoryPresenceStore, MemoryTimelineStore, PresenceStore,
};
use std::sync::Arc;
use std::time::Duration;

fn test_resources(factory: Arc<StubFactory>, registry_config: RegistryConfig) -> AppResources {
    let config = Arc::new(AppConfig {
        server_names: vec!["local".to_string()],
        listen_addr: "127.0.0.1:0".to_string(),
        multi_instance: MultiInstanceConfig::default(),
        pipeline: PipelineConfig {
            room_lanes: 4,
            user_lanes: 4,
            queue_capacity: 8,
        },
        registry: registry_config,
        federation: FederationConfig::default(),
        bus: BusConfig::default(),
    });
    let registry = Arc::new(FederationClientRegistry::new(
        Arc::new(DomainDirectory::new(vec![domain("remote", "remote:8448")])),
        Arc::new(CredentialStore::new(CredentialSnapshot::default())),
        factory,
        config.registry,
    ));
    let pipeline = Arc::new(Pipeline::start(
        &config,
        PipelineStores {
            timeline: Arc::new(MemoryTimelineStore::default()),
            friendships: Arc::new(MemoryFriendshipStore::default()),
            presence: Arc::new(MemoryPresenceStore::default()),
            sequence: Arc::new(AtomicSequence::default()),
        },
        Arc::new(LogPublisher),
    ));
    AppResources {
        config,
        registry,
        pipeline,
    }
}

#[tokio::test]
async fn test_healthz() {
    let resources = test_resources(Arc::new(StubFactory::default()), RegistryConfig::default());
    let server = TestServer::new(router(resources)).expect("create test server");

    let response = server.get("/healthz").await;
    response.assert_status_ok();
    response.assert_text("ok");
}

#[tokio::test]
async fn test_room_event_ingest() {
    let resources = test_resources(Arc::new(StubFactory::default()), RegistryConfig::default());
    let server = TestServer::new(router(resources)).expect("create test server");

    let join = member_event("!r:local", "$j", "@a:local", "join");
    let response = server
        .post("/_internal/room_events")
        .bytes(new_room_event(&join, &["@a:local"]).into())
        .await;
    response.assert_status(hyper::StatusCode::ACCEPTED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "routed");

    let response = server
        .post("/_internal/room_events")
        .bytes(bytes::Bytes::from_static(b"{oops"))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("Malformed"));
}

#[tokio::test]
async fn test_domains_update_rebuilds_local_handle() {
    let factory = Arc::new(StubFactory::default());
    let resources = test_resources(factory.clone(), RegistryConfig::default());
    let registry = resources.registry.clone();
    let server = TestServer::new(router(resources)).expect("create test server");

    let response = server
        .put("/_internal/federation/domains")
        .json(&vec![domain("remote", "remote:8448"), domain("other", "other:443")])
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["destination"], "local");
    assert_eq!(body["clients"], 2);

    assert_eq!(registry.directory().len(), 2);
    assert_eq!(registry.builds_completed(), 1);
    assert_eq!(factory.builds(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_domains_update_times_out_behind_slow_build() {
    let factory = Arc::new(StubFactory::with_delay(Duration::from_millis(400)));
    let resources = test_resources(
        factory,
        RegistryConfig {
            get_timeout_ms: 20,
            rebuild_timeout_ms: 20,
        },
    );
    let registry = resources.registry.clone();
    let server = TestServer::new(router(resources)).expect("create test server");

    let slow = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.get("local").await })
    };
    while !registry.is_building("local") {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let response = server
        .put("/_internal/federation/domains")
        .json(&vec![domain("remote", "remote:8448")])
        .await;
    response.assert_status(hyper::StatusCode::GATEWAY_TIMEOUT);
    slow.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_credentials_update_applies_revocation() {
    let resources = test_resources(Arc::new(StubFactory::default()), RegistryConfig::default());
    let registry = resources.registry.clone();
    let server = TestServer::new(router(resources)).expect("create test server");

    let response = server
        .put("/_internal/federation/credentials")
        .json(&CredentialSnapshot {
            https_enabled: Some(true),
            revoked: Some(true),
            ..CredentialSnapshot::default()
        })
        .await;
    response.assert_status(hyper::StatusCode::NO_CONTENT);
    assert!(registry.credentials().is_revoked());
}

#[tokio::test]
async fn test_presence_update_is_cached() {
    let resources = test_resources(Arc::new(StubFactory::default()), RegistryConfig::default());
    let pipeline = resources.pipeline.clone();
    let server = TestServer::new(router(resources)).expect("create test server");

    let response = server
        .post("/_internal/presence")
        .json(&presence_event("@a:local", "Alice"))
        .await;
    response.assert_status(hyper::StatusCode::ACCEPTED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["user_id"], "@a:local");

    let cached = pipeline
        .presence()
        .latest_presence("@a:local")
        .await
        .expect("presence cached");
    assert_eq!(cached.content["displayname"], "Alice");

    let response = server
        .post("/_internal/presence")
        .json(&message_event("!r:local", "$m", "@a:local"))
        .await;
    response.assert_status_bad_request();
}
