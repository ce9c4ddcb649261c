//! Per-destination transport clients.
//!
//! [`FederationTransport`] is the seam between the cert-gated
//! [`ClientHandle`](super::ClientHandle) and the network. [`HttpTransport`] is
//! the default implementation: plain JSON over hyper, TLS via rustls. Request
//! signing and server discovery are left to the deployment in front of it.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, Response};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use rustls::ClientConfig;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::tls::{client_tls_config, default_tls_config};
use super::types::*;
use crate::credentials::TlsMaterial;
use crate::domains::{DomainInfo, Scheme};
use crate::error::TransportError;

/// Receives a media body chunk by chunk. Returning an error aborts the download.
pub type MediaSink<'a> = &'a mut (dyn FnMut(Bytes) -> Result<(), TransportError> + Send);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MediaMeta {
    pub content_type: Option<String>,
    pub bytes: u64,
}

#[async_trait]
pub trait FederationTransport: Send + Sync {
    async fn lookup_room_alias(
        &self,
        destination: &str,
        alias: &str,
    ) -> Result<RespDirectory, TransportError>;

    async fn lookup_profile(
        &self,
        destination: &str,
        user_id: &str,
    ) -> Result<RespProfile, TransportError>;

    async fn lookup_avatar_url(
        &self,
        destination: &str,
        user_id: &str,
    ) -> Result<RespAvatarUrl, TransportError>;

    async fn lookup_display_name(
        &self,
        destination: &str,
        user_id: &str,
    ) -> Result<RespDisplayName, TransportError>;

    async fn lookup_state(
        &self,
        destination: &str,
        room_id: &str,
        event_id: &str,
    ) -> Result<RespState, TransportError>;

    async fn download(
        &self,
        destination: &str,
        request: &MediaRequest,
        sink: MediaSink<'_>,
    ) -> Result<MediaMeta, TransportError>;

    async fn lookup_media_info(
        &self,
        destination: &str,
        media_id: &str,
        user_id: &str,
    ) -> Result<RespMediaInfo, TransportError>;

    async fn lookup_user_info(
        &self,
        destination: &str,
        user_id: &str,
    ) -> Result<RespUserInfo, TransportError>;

    async fn backfill(
        &self,
        destination: &str,
        room_id: &str,
        limit: u32,
        event_ids: &[String],
        direction: BackfillDirection,
    ) -> Result<BackfillResponse, TransportError>;

    async fn send_transaction(&self, txn: &Transaction) -> Result<RespSend, TransportError>;

    async fn make_join(
        &self,
        destination: &str,
        room_id: &str,
        user_id: &str,
        versions: &[String],
    ) -> Result<RespMakeJoin, TransportError>;

    async fn send_join(
        &self,
        destination: &str,
        room_id: &str,
        event_id: &str,
        event: &Pdu,
    ) -> Result<RespSendJoin, TransportError>;

    async fn send_invite(
        &self,
        destination: &str,
        event: &Pdu,
    ) -> Result<RespInvite, TransportError>;

    async fn make_leave(
        &self,
        destination: &str,
        room_id: &str,
        user_id: &str,
    ) -> Result<RespMakeLeave, TransportError>;

    async fn send_leave(
        &self,
        destination: &str,
        room_id: &str,
        event_id: &str,
        event: &Pdu,
    ) -> Result<RespSendLeave, TransportError>;
}

/// Builds the transport for one resolved destination.
///
/// Called by the registry while it holds the build marker, so it must not
/// block on other registry operations.
pub trait TransportFactory: Send + Sync {
    fn build(
        &self,
        domain: &DomainInfo,
        host: &str,
        material: &TlsMaterial,
    ) -> Result<Arc<dyn FederationTransport>, TransportError>;
}

pub struct HttpTransportFactory {
    request_timeout: Duration,
}

impl HttpTransportFactory {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for HttpTransportFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl TransportFactory for HttpTransportFactory {
    fn build(
        &self,
        domain: &DomainInfo,
        host: &str,
        material: &TlsMaterial,
    ) -> Result<Arc<dyn FederationTransport>, TransportError> {
        let tls = match domain.scheme {
            Scheme::Http => default_tls_config()?,
            Scheme::Https => client_tls_config(material)?,
        };
        let transport = HttpTransport::new(domain.scheme, host, tls, self.request_timeout)?;
        Ok(Arc::new(transport))
    }
}

type HttpsClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

const FEDERATION_V1: [&str; 3] = ["_matrix", "federation", "v1"];

pub struct HttpTransport {
    base: Url,
    client: HttpsClient,
    request_timeout: Duration,
}

fn network(e: impl std::fmt::Display) -> TransportError {
    TransportError::Network(e.to_string())
}

fn invalid_url(e: impl std::fmt::Display) -> TransportError {
    TransportError::InvalidUrl(e.to_string())
}

impl HttpTransport {
    pub fn new(
        scheme: Scheme,
        host: &str,
        tls: Arc<ClientConfig>,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let base = Url::parse(&format!("{scheme}://{host}/")).map_err(invalid_url)?;
        let connector = HttpsConnectorBuilder::new()
            .with_tls_config((*tls).clone())
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Ok(Self {
            base,
            client,
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `/_matrix/federation/v1/<segments..>?<query..>`, each segment percent-encoded.
    fn federation_url(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<Url, TransportError> {
        let mut path: Vec<&str> = FEDERATION_V1.to_vec();
        path.extend_from_slice(segments);
        self.url(path, query)
    }

    fn url<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
        query: &[(&str, &str)],
    ) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl(format!("{} cannot carry a path", self.base)))?
            .clear()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    #[tracing::instrument(name = "federation_request", skip(self, body), fields(method = %method, url = %url))]
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
    ) -> Result<Response<Incoming>, TransportError> {
        let request = Request::builder()
            .method(method)
            .uri(url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(invalid_url)?;

        let response = tokio::time::timeout(self.request_timeout, self.client.request(request))
            .await
            .map_err(|_| self.timed_out("request"))?
            .map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            let body = match self.read_body(response.into_body()).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(_) => String::new(),
            };
            return Err(TransportError::Http { status, body });
        }
        Ok(response)
    }

    fn timed_out(&self, what: &str) -> TransportError {
        TransportError::Network(format!("{what} timed out after {:?}", self.request_timeout))
    }

    /// Collect a whole response body within the request timeout.
    async fn read_body(&self, body: Incoming) -> Result<Bytes, TransportError> {
        let collected = tokio::time::timeout(self.request_timeout, body.collect())
            .await
            .map_err(|_| self.timed_out("response body"))?
            .map_err(network)?;
        Ok(collected.to_bytes())
    }

    async fn json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
    ) -> Result<T, TransportError> {
        let response = self.send(method, url, body).await?;
        let bytes = self.read_body(response.into_body()).await?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Json(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, TransportError> {
        self.json(Method::GET, url, None).await
    }

    async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, TransportError> {
        let body = serde_json::to_vec(body).map_err(|e| TransportError::Json(e.to_string()))?;
        self.json(Method::PUT, url, Some(body)).await
    }
}

#[async_trait]
impl FederationTransport for HttpTransport {
    async fn lookup_room_alias(
        &self,
        _destination: &str,
        alias: &str,
    ) -> Result<RespDirectory, TransportError> {
        let url = self.federation_url(&["query", "directory"], &[("room_alias", alias)])?;
        self.get(url).await
    }

    async fn lookup_profile(
        &self,
        _destination: &str,
        user_id: &str,
    ) -> Result<RespProfile, TransportError> {
        let url = self.federation_url(&["query", "profile"], &[("user_id", user_id)])?;
        self.get(url).await
    }

    async fn lookup_avatar_url(
        &self,
        _destination: &str,
        user_id: &str,
    ) -> Result<RespAvatarUrl, TransportError> {
        let url = self.federation_url(
            &["query", "profile"],
            &[("user_id", user_id), ("field", "avatar_url")],
        )?;
        self.get(url).await
    }

    async fn lookup_display_name(
        &self,
        _destination: &str,
        user_id: &str,
    ) -> Result<RespDisplayName, TransportError> {
        let url = self.federation_url(
            &["query", "profile"],
            &[("user_id", user_id), ("field", "displayname")],
        )?;
        self.get(url).await
    }

    async fn lookup_state(
        &self,
        _destination: &str,
        room_id: &str,
        event_id: &str,
    ) -> Result<RespState, TransportError> {
        let url = self.federation_url(&["state", room_id], &[("event_id", event_id)])?;
        self.get(url).await
    }

    async fn download(
        &self,
        _destination: &str,
        request: &MediaRequest,
        sink: MediaSink<'_>,
    ) -> Result<MediaMeta, TransportError> {
        let endpoint = if request.width.is_some() {
            "thumbnail"
        } else {
            "download"
        };
        let mut query = Vec::new();
        if let Some(width) = request.width.as_deref() {
            query.push(("width", width));
            query.push(("height", width));
        }
        if let Some(method) = request.method.as_deref() {
            query.push(("method", method));
        }
        if let Some(file_type) = request.file_type.as_deref() {
            query.push(("type", file_type));
        }
        let url = self.url(
            [
                "_matrix",
                "media",
                "r0",
                endpoint,
                request.domain.as_str(),
                request.media_id.as_str(),
            ],
            &query,
        )?;

        let response = self.send(Method::GET, url, None).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let mut body = response.into_body();
        let mut total = 0u64;
        // Each chunk must arrive within the request timeout.
        while let Some(frame) = tokio::time::timeout(self.request_timeout, body.frame())
            .await
            .map_err(|_| self.timed_out("media chunk"))?
        {
            let frame = frame.map_err(network)?;
            if let Ok(chunk) = frame.into_data() {
                total += chunk.len() as u64;
                sink(chunk)?;
            }
        }
        Ok(MediaMeta {
            content_type,
            bytes: total,
        })
    }

    async fn lookup_media_info(
        &self,
        _destination: &str,
        media_id: &str,
        user_id: &str,
    ) -> Result<RespMediaInfo, TransportError> {
        let url = self.federation_url(&["media", "info", media_id], &[("user_id", user_id)])?;
        self.get(url).await
    }

    async fn lookup_user_info(
        &self,
        _destination: &str,
        user_id: &str,
    ) -> Result<RespUserInfo, TransportError> {
        let url = self.federation_url(&["query", "user_info"], &[("user_id", user_id)])?;
        self.get(url).await
    }

    async fn backfill(
        &self,
        _destination: &str,
        room_id: &str,
        limit: u32,
        event_ids: &[String],
        direction: BackfillDirection,
    ) -> Result<BackfillResponse, TransportError> {
        let limit = limit.to_string();
        let mut query: Vec<(&str, &str)> = event_ids.iter().map(|id| ("v", id.as_str())).collect();
        query.push(("limit", &limit));
        query.push(("dir", direction.as_str()));
        let url = self.federation_url(&["backfill", room_id], &query)?;
        self.get(url).await
    }

    async fn send_transaction(&self, txn: &Transaction) -> Result<RespSend, TransportError> {
        let url = self.federation_url(&["send", &txn.transaction_id], &[])?;
        self.put(url, txn).await
    }

    async fn make_join(
        &self,
        _destination: &str,
        room_id: &str,
        user_id: &str,
        versions: &[String],
    ) -> Result<RespMakeJoin, TransportError> {
        let query: Vec<(&str, &str)> = versions.iter().map(|v| ("ver", v.as_str())).collect();
        let url = self.federation_url(&["make_join", room_id, user_id], &query)?;
        self.get(url).await
    }

    async fn send_join(
        &self,
        _destination: &str,
        room_id: &str,
        event_id: &str,
        event: &Pdu,
    ) -> Result<RespSendJoin, TransportError> {
        let url = self.federation_url(&["send_join", room_id, event_id], &[])?;
        self.put(url, event).await
    }

    async fn send_invite(
        &self,
        _destination: &str,
        event: &Pdu,
    ) -> Result<RespInvite, TransportError> {
        let url = self.federation_url(&["invite", &event.room_id, &event.event_id], &[])?;
        self.put(url, event).await
    }

    async fn make_leave(
        &self,
        _destination: &str,
        room_id: &str,
        user_id: &str,
    ) -> Result<RespMakeLeave, TransportError> {
        let url = self.federation_url(&["make_leave", room_id, user_id], &[])?;
        self.get(url).await
    }

    async fn send_leave(
        &self,
        _destination: &str,
        room_id: &str,
        event_id: &str,
        event: &Pdu,
    ) -> Result<RespSendLeave, TransportError> {
        let url = self.federation_url(&["send_leave", room_id, event_id], &[])?;
        self.put(url, event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(scheme: Scheme, host: &str) -> HttpTransport {
        HttpTransport::new(
            scheme,
            host,
            default_tls_config().unwrap(),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn federation_urls_encode_path_segments() {
        let t = transport(Scheme::Https, "remote.example:8448");
        let url = t
            .federation_url(&["state", "!room/with:slash"], &[("event_id", "$ev")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://remote.example:8448/_matrix/federation/v1/state/!room%2Fwith:slash?event_id=%24ev"
        );
    }

    #[tokio::test]
    async fn plain_scheme_builds_http_base() {
        let t = transport(Scheme::Http, "127.0.0.1:8008");
        assert_eq!(t.base_url().as_str(), "http://127.0.0.1:8008/");
    }

    #[tokio::test]
    async fn factory_builds_both_schemes() {
        let factory = HttpTransportFactory::default();
        for scheme in [Scheme::Http, Scheme::Https] {
            let domain = DomainInfo {
                domain: "remote.example".into(),
                scheme,
                host: "remote.example".into(),
            };
            assert!(factory
                .build(&domain, &domain.host, &TlsMaterial::default())
                .is_ok());
        }
    }
}
