//! Shared scaffolding for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use matrix_fedsync::credentials::TlsMaterial;
use matrix_fedsync::domains::{DomainInfo, Scheme};
use matrix_fedsync::error::TransportError;
use matrix_fedsync::events::ClientEvent;
use matrix_fedsync::federation::types::*;
use matrix_fedsync::federation::{FederationTransport, MediaMeta, MediaSink, TransportFactory};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Transport that answers every call with an empty body and counts calls.
#[derive(Default)]
pub struct StubTransport {
    pub calls: Arc<AtomicUsize>,
}

impl StubTransport {
    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FederationTransport for StubTransport {
    async fn lookup_room_alias(&self, _: &str, _: &str) -> Result<RespDirectory, TransportError> {
        self.hit();
        Ok(RespDirectory::default())
    }

    async fn lookup_profile(&self, _: &str, user_id: &str) -> Result<RespProfile, TransportError> {
        self.hit();
        Ok(RespProfile {
            displayname: user_id.to_string(),
            avatar_url: String::new(),
        })
    }

    async fn lookup_avatar_url(&self, _: &str, _: &str) -> Result<RespAvatarUrl, TransportError> {
        self.hit();
        Ok(RespAvatarUrl::default())
    }

    async fn lookup_display_name(
        &self,
        _: &str,
        _: &str,
    ) -> Result<RespDisplayName, TransportError> {
        self.hit();
        Ok(RespDisplayName::default())
    }

    async fn lookup_state(&self, _: &str, _: &str, _: &str) -> Result<RespState, TransportError> {
        self.hit();
        Ok(RespState::default())
    }

    async fn download(
        &self,
        _: &str,
        _: &MediaRequest,
        _: MediaSink<'_>,
    ) -> Result<MediaMeta, TransportError> {
        self.hit();
        Ok(MediaMeta::default())
    }

    async fn lookup_media_info(
        &self,
        _: &str,
        _: &str,
        _: &str,
    ) -> Result<RespMediaInfo, TransportError> {
        self.hit();
        Ok(RespMediaInfo::default())
    }

    async fn lookup_user_info(&self, _: &str, _: &str) -> Result<RespUserInfo, TransportError> {
        self.hit();
        Ok(RespUserInfo::default())
    }

    async fn backfill(
        &self,
        _: &str,
        _: &str,
        _: u32,
        _: &[String],
        _: BackfillDirection,
    ) -> Result<BackfillResponse, TransportError> {
        self.hit();
        Ok(BackfillResponse::default())
    }

    async fn send_transaction(&self, _: &Transaction) -> Result<RespSend, TransportError> {
        self.hit();
        Ok(RespSend::default())
    }

    async fn make_join(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &[String],
    ) -> Result<RespMakeJoin, TransportError> {
        self.hit();
        Ok(RespMakeJoin::default())
    }

    async fn send_join(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &Pdu,
    ) -> Result<RespSendJoin, TransportError> {
        self.hit();
        Ok(RespSendJoin::default())
    }

    async fn send_invite(&self, _: &str, _: &Pdu) -> Result<RespInvite, TransportError> {
        self.hit();
        Ok(RespInvite::default())
    }

    async fn make_leave(&self, _: &str, _: &str, _: &str) -> Result<RespMakeLeave, TransportError> {
        self.hit();
        Ok(RespMakeLeave::default())
    }

    async fn send_leave(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &Pdu,
    ) -> Result<RespSendLeave, TransportError> {
        self.hit();
        Ok(RespSendLeave::default())
    }
}

/// Factory handing out [`StubTransport`]s. `delay` blocks the building
/// thread to widen the window in which concurrent callers pile up.
#[derive(Default)]
pub struct StubFactory {
    pub builds: AtomicUsize,
    pub calls: Arc<AtomicUsize>,
    pub delay: Duration,
    pub failing_hosts: Vec<String>,
}

impl StubFactory {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TransportFactory for StubFactory {
    fn build(
        &self,
        _domain: &DomainInfo,
        host: &str,
        _material: &TlsMaterial,
    ) -> Result<Arc<dyn FederationTransport>, TransportError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.failing_hosts.iter().any(|h| h == host) {
            return Err(TransportError::Tls(format!("no usable certificate for {host}")));
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StubTransport {
            calls: self.calls.clone(),
        }))
    }
}

pub fn domain(name: &str, host: &str) -> DomainInfo {
    DomainInfo {
        domain: name.to_string(),
        scheme: Scheme::Https,
        host: host.to_string(),
    }
}

pub fn member_event(room: &str, id: &str, user: &str, membership: &str) -> ClientEvent {
    ClientEvent {
        room_id: room.to_string(),
        event_id: id.to_string(),
        event_type: "m.room.member".to_string(),
        state_key: Some(user.to_string()),
        sender: user.to_string(),
        content: serde_json::json!({ "membership": membership }),
        origin_server_ts: 0,
    }
}

pub fn message_event(room: &str, id: &str, sender: &str) -> ClientEvent {
    ClientEvent {
        room_id: room.to_string(),
        event_id: id.to_string(),
        event_type: "m.room.message".to_string(),
        state_key: None,
        sender: sender.to_string(),
        content: serde_json::json!({ "body": "hi" }),
        origin_server_ts: 0,
    }
}

pub fn presence_event(user: &str, displayname: &str) -> ClientEvent {
    ClientEvent {
        room_id: String::new(),
        event_id: format!("$presence-{user}"),
        event_type: "m.presence".to_string(),
        state_key: None,
        sender: user.to_string(),
        content: serde_json::json!({ "presence": "online", "displayname": displayname }),
        origin_server_ts: 0,
    }
}

/// Bus payload carrying `event` with the room's `joined` list.
pub fn new_room_event(event: &ClientEvent, joined: &[&str]) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "type": "new_room_event",
        "new_room_event": { "event": event, "joined": joined },
    }))
    .expect("serialize payload")
}
