//! Profile EDUs for domains that just gained visibility of a local user.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::Instrument;

use crate::bus::EduPublisher;
use crate::events::{Edu, PROFILE_EDU_TYPE, PresenceContent, ProfileContent, domain_from_id};
use crate::storage::PresenceStore;

/// Foreign domain -> local users whose profile it should receive.
pub type PushSet = BTreeMap<String, BTreeSet<String>>;

pub struct CrossDomainNotifier {
    presence: Arc<dyn PresenceStore>,
    publisher: Arc<dyn EduPublisher>,
    topic: String,
}

impl CrossDomainNotifier {
    pub fn new(
        presence: Arc<dyn PresenceStore>,
        publisher: Arc<dyn EduPublisher>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            presence,
            publisher,
            topic: topic.into(),
        }
    }

    /// Publish one profile EDU per (domain, user) pair. Returns how many
    /// were handed to the bus successfully.
    pub async fn notify(&self, pushes: PushSet) -> usize {
        let mut sent = 0;
        for (domain, users) in pushes {
            for user in users {
                if self.push_profile(&domain, &user).await {
                    sent += 1;
                }
            }
        }
        sent
    }

    async fn push_profile(&self, destination: &str, user: &str) -> bool {
        let Some(edu) = self.profile_edu(destination, user).await else {
            return false;
        };

        let span = tracing::info_span!(
            "edu_publish",
            topic = %self.topic,
            user = %user,
            destination = %destination
        );
        match self.publisher.publish(user, &edu).instrument(span).await {
            Ok(()) => {
                tracing::info!(
                    name = "notifier.profile_sent",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    user = %user,
                    destination = %destination,
                    message = "sent profile to new domain"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    name = "notifier.profile_failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    user = %user,
                    destination = %destination,
                    error = %e,
                    message = "failed to publish profile EDU"
                );
                false
            }
        }
    }

    async fn profile_edu(&self, destination: &str, user: &str) -> Option<Edu> {
        let Some(presence) = self.presence.latest_presence(user).await else {
            tracing::debug!(user = %user, destination = %destination, "no presence cached, skipping profile push");
            return None;
        };
        let origin = domain_from_id(user)?;

        let content: PresenceContent = match serde_json::from_value(presence.content) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(
                    name = "notifier.bad_presence",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    user = %user,
                    error = %e,
                    message = "cached presence content does not parse, sending empty profile"
                );
                PresenceContent::default()
            }
        };
        let profile = ProfileContent::from_presence(user, content);
        let content = serde_json::to_value(&profile).ok()?;

        Some(Edu {
            edu_type: PROFILE_EDU_TYPE.to_string(),
            origin: origin.to_string(),
            destination: destination.to_string(),
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChannelPublisher;
    use crate::events::ClientEvent;
    use crate::storage::MemoryPresenceStore;

    fn presence_event(user: &str) -> ClientEvent {
        ClientEvent {
            room_id: String::new(),
            event_id: "$p".into(),
            event_type: "m.presence".into(),
            state_key: None,
            sender: user.into(),
            content: serde_json::json!({
                "presence": "online",
                "displayname": "Alice",
                "avatar_url": "mxc://local/a",
                "email": "alice@local"
            }),
            origin_server_ts: 0,
        }
    }

    #[tokio::test]
    async fn builds_profile_edu_from_presence() {
        let presence = Arc::new(MemoryPresenceStore::default());
        presence.set("@a:local", presence_event("@a:local"));
        let (publisher, mut rx) = ChannelPublisher::new();
        let notifier = CrossDomainNotifier::new(presence, Arc::new(publisher), "fedEduUpdate");

        let mut pushes = PushSet::new();
        pushes.entry("foreign".into()).or_default().insert("@a:local".into());
        assert_eq!(notifier.notify(pushes).await, 1);

        let published = rx.recv().await.unwrap();
        assert_eq!(published.key, "@a:local");
        assert_eq!(published.edu.edu_type, "profile");
        assert_eq!(published.edu.origin, "local");
        assert_eq!(published.edu.destination, "foreign");
        assert_eq!(published.edu.content["display_name"], "Alice");
        assert_eq!(published.edu.content["presence"], "online");
        assert_eq!(published.edu.content["email"], "alice@local");
    }

    #[tokio::test]
    async fn skips_users_without_presence() {
        let (publisher, mut rx) = ChannelPublisher::new();
        let notifier = CrossDomainNotifier::new(
            Arc::new(MemoryPresenceStore::default()),
            Arc::new(publisher),
            "fedEduUpdate",
        );
        let mut pushes = PushSet::new();
        pushes.entry("foreign".into()).or_default().insert("@ghost:local".into());
        assert_eq!(notifier.notify(pushes).await, 0);
        assert!(rx.try_recv().is_err());
    }
}
