//! Outbound message bus for profile EDUs.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::RetryConfig;
use crate::error::BusError;
use crate::events::Edu;
use crate::federation::tls::default_tls_config;

#[async_trait]
pub trait EduPublisher: Send + Sync {
    /// Publish `edu` partitioned by `key` (the subject user id).
    async fn publish(&self, key: &str, edu: &Edu) -> Result<(), BusError>;
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl From<RetryConfig> for RetryPolicy {
    fn from(cfg: RetryConfig) -> Self {
        Self {
            attempts: cfg.attempts.max(1),
            initial_backoff: Duration::from_millis(cfg.initial_backoff_ms),
        }
    }
}

/// Retries the inner publisher with exponential backoff.
pub struct RetryingPublisher<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: EduPublisher> RetryingPublisher<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: EduPublisher> EduPublisher for RetryingPublisher<P> {
    async fn publish(&self, key: &str, edu: &Edu) -> Result<(), BusError> {
        let attempts = self.policy.attempts.max(1);
        let mut backoff = self.policy.initial_backoff;
        let mut last = String::new();
        for attempt in 1..=attempts {
            match self.inner.publish(key, edu).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        name = "bus.publish_retry",
                        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                        key = %key,
                        attempt,
                        error = %e,
                        message = "publish attempt failed"
                    );
                    last = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }
        Err(BusError::Exhausted { attempts, last })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PublishedEdu {
    pub key: String,
    pub edu: Edu,
}

/// In-process bus; the receiving half is handed to whoever consumes EDUs.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<PublishedEdu>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PublishedEdu>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EduPublisher for ChannelPublisher {
    async fn publish(&self, key: &str, edu: &Edu) -> Result<(), BusError> {
        self.tx
            .send(PublishedEdu {
                key: key.to_string(),
                edu: edu.clone(),
            })
            .map_err(|_| BusError::Publish("EDU channel closed".into()))
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    topic: &'a str,
    key: &'a str,
    value: &'a Edu,
}

/// Posts each EDU as `{topic, key, value}` JSON to a bus bridge endpoint.
pub struct HttpPublisher {
    endpoint: Uri,
    topic: String,
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HttpPublisher {
    pub fn new(endpoint: &str, topic: impl Into<String>) -> Result<Self, BusError> {
        let endpoint: Uri = endpoint
            .parse()
            .map_err(|e| BusError::Publish(format!("invalid bus endpoint {endpoint}: {e}")))?;
        let tls = default_tls_config().map_err(|e| BusError::Publish(e.to_string()))?;
        let connector = HttpsConnectorBuilder::new()
            .with_tls_config((*tls).clone())
            .https_or_http()
            .enable_http1()
            .build();
        Ok(Self {
            endpoint,
            topic: topic.into(),
            client: Client::builder(TokioExecutor::new()).build(connector),
        })
    }
}

#[async_trait]
impl EduPublisher for HttpPublisher {
    async fn publish(&self, key: &str, edu: &Edu) -> Result<(), BusError> {
        let body = serde_json::to_vec(&Envelope {
            topic: &self.topic,
            key,
            value: edu,
        })
        .map_err(|e| BusError::Publish(e.to_string()))?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| BusError::Publish(e.to_string()))?;
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;
        let status = response.status();
        // Drain the body so the connection can be reused.
        let _ = response.into_body().collect().await;
        if status.is_success() {
            Ok(())
        } else {
            Err(BusError::Publish(format!("bus endpoint answered {status}")))
        }
    }
}

/// Logs every EDU at info level; used when no bus endpoint is configured.
pub struct LogPublisher;

#[async_trait]
impl EduPublisher for LogPublisher {
    async fn publish(&self, key: &str, edu: &Edu) -> Result<(), BusError> {
        tracing::info!(
            name = "bus.edu",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            key = %key,
            origin = %edu.origin,
            destination = %edu.destination,
            content = %edu.content,
            message = "profile EDU (no bus endpoint configured)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EduPublisher for Flaky {
        async fn publish(&self, _key: &str, _edu: &Edu) -> Result<(), BusError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(BusError::Publish("broker unavailable".into()));
            }
            Ok(())
        }
    }

    fn edu() -> Edu {
        Edu {
            edu_type: "profile".into(),
            origin: "local".into(),
            destination: "remote".into(),
            content: serde_json::json!({}),
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let publisher = RetryingPublisher::new(
            Flaky {
                failures_left: AtomicU32::new(2),
                calls: AtomicU32::new(0),
            },
            policy(3),
        );
        publisher.publish("@a:local", &edu()).await.unwrap();
        assert_eq!(publisher.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() {
        let publisher = RetryingPublisher::new(
            Flaky {
                failures_left: AtomicU32::new(10),
                calls: AtomicU32::new(0),
            },
            policy(2),
        );
        let err = publisher.publish("@a:local", &edu()).await.unwrap_err();
        assert!(matches!(err, BusError::Exhausted { attempts: 2, .. }));
        assert_eq!(publisher.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn channel_publisher_delivers_keyed_edu() {
        let (publisher, mut rx) = ChannelPublisher::new();
        publisher.publish("@a:local", &edu()).await.unwrap();
        let published = rx.recv().await.unwrap();
        assert_eq!(published.key, "@a:local");
        assert_eq!(published.edu.destination, "remote");
    }
}
