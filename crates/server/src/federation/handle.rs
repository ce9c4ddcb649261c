use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::transport::{FederationTransport, MediaMeta, MediaSink};
use super::types::*;
use crate::credentials::CredentialStore;
use crate::error::FederationError;

/// The set of per-destination transports built together by the registry.
///
/// Every operation checks the global revocation flag first and fails with
/// [`FederationError::CertRevoked`] before touching the network. Transport
/// results are passed through as-is; there is no retry at this layer.
pub struct ClientHandle {
    clients: HashMap<String, Arc<dyn FederationTransport>>,
    credentials: Arc<CredentialStore>,
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("destinations", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ClientHandle {
    pub fn new(
        clients: HashMap<String, Arc<dyn FederationTransport>>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            clients,
            credentials,
        }
    }

    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn client_for(
        &self,
        destination: &str,
    ) -> Result<&Arc<dyn FederationTransport>, FederationError> {
        self.clients
            .get(destination)
            .ok_or_else(|| FederationError::DestinationNotFound(destination.to_string()))
    }

    fn check_cert(&self) -> Result<(), FederationError> {
        if self.credentials.is_revoked() {
            tracing::warn!(
                name = "federation.cert_revoked",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                message = "federation request refused, certificate revoked or expired"
            );
            return Err(FederationError::CertRevoked);
        }
        Ok(())
    }

    fn gate(&self, destination: &str) -> Result<&Arc<dyn FederationTransport>, FederationError> {
        self.check_cert()?;
        self.client_for(destination)
    }

    pub async fn lookup_room_alias(
        &self,
        destination: &str,
        alias: &str,
    ) -> Result<RespDirectory, FederationError> {
        let client = self.gate(destination)?;
        Ok(client.lookup_room_alias(destination, alias).await?)
    }

    pub async fn lookup_profile(
        &self,
        destination: &str,
        user_id: &str,
    ) -> Result<RespProfile, FederationError> {
        let client = self.gate(destination)?;
        Ok(client.lookup_profile(destination, user_id).await?)
    }

    pub async fn lookup_avatar_url(
        &self,
        destination: &str,
        user_id: &str,
    ) -> Result<RespAvatarUrl, FederationError> {
        let client = self.gate(destination)?;
        Ok(client.lookup_avatar_url(destination, user_id).await?)
    }

    pub async fn lookup_display_name(
        &self,
        destination: &str,
        user_id: &str,
    ) -> Result<RespDisplayName, FederationError> {
        let client = self.gate(destination)?;
        Ok(client.lookup_display_name(destination, user_id).await?)
    }

    pub async fn lookup_state(
        &self,
        destination: &str,
        room_id: &str,
        event_id: &str,
    ) -> Result<RespState, FederationError> {
        let client = self.gate(destination)?;
        Ok(client.lookup_state(destination, room_id, event_id).await?)
    }

    pub async fn download(
        &self,
        destination: &str,
        request: &MediaRequest,
        sink: MediaSink<'_>,
    ) -> Result<MediaMeta, FederationError> {
        let client = self.gate(destination)?;
        Ok(client.download(destination, request, sink).await?)
    }

    pub async fn lookup_media_info(
        &self,
        destination: &str,
        media_id: &str,
        user_id: &str,
    ) -> Result<RespMediaInfo, FederationError> {
        let client = self.gate(destination)?;
        Ok(client
            .lookup_media_info(destination, media_id, user_id)
            .await?)
    }

    pub async fn lookup_user_info(
        &self,
        destination: &str,
        user_id: &str,
    ) -> Result<RespUserInfo, FederationError> {
        let client = self.gate(destination)?;
        Ok(client.lookup_user_info(destination, user_id).await?)
    }

    pub async fn backfill(
        &self,
        destination: &str,
        room_id: &str,
        limit: u32,
        event_ids: &[String],
        direction: BackfillDirection,
    ) -> Result<BackfillResponse, FederationError> {
        let client = self.gate(destination)?;
        Ok(client
            .backfill(destination, room_id, limit, event_ids, direction)
            .await?)
    }

    /// The destination is taken from the transaction itself.
    pub async fn send_transaction(&self, txn: &Transaction) -> Result<RespSend, FederationError> {
        let client = self.gate(&txn.destination)?;
        Ok(client.send_transaction(txn).await?)
    }

    pub async fn make_join(
        &self,
        destination: &str,
        room_id: &str,
        user_id: &str,
        versions: &[String],
    ) -> Result<RespMakeJoin, FederationError> {
        let client = self.gate(destination)?;
        Ok(client
            .make_join(destination, room_id, user_id, versions)
            .await?)
    }

    pub async fn send_join(
        &self,
        destination: &str,
        room_id: &str,
        event_id: &str,
        event: &Pdu,
    ) -> Result<RespSendJoin, FederationError> {
        let client = self.gate(destination)?;
        Ok(client
            .send_join(destination, room_id, event_id, event)
            .await?)
    }

    pub async fn send_invite(
        &self,
        destination: &str,
        event: &Pdu,
    ) -> Result<RespInvite, FederationError> {
        let client = self.gate(destination)?;
        Ok(client.send_invite(destination, event).await?)
    }

    pub async fn make_leave(
        &self,
        destination: &str,
        room_id: &str,
        user_id: &str,
    ) -> Result<RespMakeLeave, FederationError> {
        let client = self.gate(destination)?;
        Ok(client.make_leave(destination, room_id, user_id).await?)
    }

    pub async fn send_leave(
        &self,
        destination: &str,
        room_id: &str,
        event_id: &str,
        event: &Pdu,
    ) -> Result<RespSendLeave, FederationError> {
        let client = self.gate(destination)?;
        Ok(client
            .send_leave(destination, room_id, event_id, event)
            .await?)
    }
}
