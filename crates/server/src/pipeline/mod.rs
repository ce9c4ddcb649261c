//! Sharded event pipeline.
//!
//! Room events arrive through [`EventRouter::on_message`] and are handled on
//! a lane chosen by room id, so a room's events are processed one at a time
//! in arrival order. The handler ([`FriendshipGraphBuilder`]) writes user
//! timelines through [`TimelineInsertRouter`], whose lanes are chosen by user
//! id, and waits for every insert before taking the room's next event.
//! Newly visible cross-domain users are announced by [`CrossDomainNotifier`],
//! using the presence cached through [`Pipeline::record_presence`].

pub mod friendship;
pub mod lanes;
pub mod notifier;
pub mod partition;
pub mod router;
pub mod timeline;

pub use friendship::FriendshipGraphBuilder;
pub use lanes::{LaneHandler, LanePool};
pub use notifier::{CrossDomainNotifier, PushSet};
pub use partition::{InstancePartition, lane_index, stable_hash};
pub use router::{Dispatch, EventRouter, RoomEventNotification};
pub use timeline::{PendingInsert, TimelineInsertRequest, TimelineInsertRouter};

use std::sync::Arc;

use crate::bus::EduPublisher;
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::events::{ClientEvent, PresenceContent, domain_from_id};
use crate::storage::{FriendshipStore, PresenceStore, SequenceGenerator, TimelineStore};

/// Storage the pipeline writes to and reads from.
#[derive(Clone)]
pub struct PipelineStores {
    pub timeline: Arc<dyn TimelineStore>,
    pub friendships: Arc<dyn FriendshipStore>,
    pub presence: Arc<dyn PresenceStore>,
    pub sequence: Arc<dyn SequenceGenerator>,
}

pub struct Pipeline {
    router: EventRouter,
    timeline: Arc<TimelineInsertRouter>,
    presence: Arc<dyn PresenceStore>,
}

impl Pipeline {
    /// Spawn both lane pools. Must be called inside a tokio runtime.
    pub fn start(
        config: &AppConfig,
        stores: PipelineStores,
        publisher: Arc<dyn EduPublisher>,
    ) -> Self {
        let partition = InstancePartition::from(config.multi_instance);
        let timeline = Arc::new(TimelineInsertRouter::start(
            &config.pipeline,
            stores.sequence,
            stores.timeline,
        ));
        let presence = stores.presence;
        let notifier = Arc::new(CrossDomainNotifier::new(
            presence.clone(),
            publisher,
            config.bus.edu_topic.clone(),
        ));
        let builder = Arc::new(FriendshipGraphBuilder::new(
            partition,
            config.server_names.iter().cloned(),
            stores.friendships,
            timeline.clone(),
            notifier,
        ));
        let router = EventRouter::start(&config.pipeline, partition, builder);
        Self {
            router,
            timeline,
            presence,
        }
    }

    pub async fn on_message(&self, payload: &[u8]) -> Result<Dispatch, PipelineError> {
        self.router.on_message(payload).await
    }

    /// Cache a user's latest `m.presence` event for later profile pushes.
    /// The user is `content.user_id`, falling back to the sender.
    pub async fn record_presence(&self, event: ClientEvent) -> Result<String, PipelineError> {
        if !event.is_presence() {
            return Err(PipelineError::MalformedMessage(format!(
                "expected m.presence, got {}",
                event.event_type
            )));
        }
        let content: PresenceContent = serde_json::from_value(event.content.clone())
            .map_err(|e| PipelineError::MalformedMessage(format!("presence content: {e}")))?;
        let user_id = if content.user_id.is_empty() {
            event.sender.clone()
        } else {
            content.user_id
        };
        if domain_from_id(&user_id).is_none() {
            return Err(PipelineError::MalformedMessage(format!(
                "invalid presence user id {user_id:?}"
            )));
        }
        self.presence.record_presence(&user_id, event).await?;
        tracing::debug!(user_id = %user_id, "presence cached");
        Ok(user_id)
    }

    pub fn presence(&self) -> &Arc<dyn PresenceStore> {
        &self.presence
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn timeline(&self) -> &Arc<TimelineInsertRouter> {
        &self.timeline
    }

    /// Drain the room lanes, then the user lanes they feed.
    pub async fn shutdown(self) {
        self.router.shutdown().await;
        // Room workers held the only other references.
        if let Ok(timeline) = Arc::try_unwrap(self.timeline) {
            timeline.shutdown().await;
        }
    }
}
