//! Room-keyed dispatch of inbound room events.

use std::sync::Arc;

use super::friendship::FriendshipGraphBuilder;
use super::lanes::LanePool;
use super::partition::InstancePartition;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::events::{ClientEvent, OUTPUT_TYPE_NEW_ROOM_EVENT, OutputEvent};

/// A room event together with the room's joined users.
#[derive(Clone, Debug)]
pub struct RoomEventNotification {
    pub event: Arc<ClientEvent>,
    pub joined: Vec<String>,
    /// Members of `joined` owned by this instance.
    pub relate_joined: Vec<String>,
}

/// What `on_message` did with a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Routed { lane: usize },
    /// No related user and not a membership change.
    Filtered,
    /// Not a room event.
    Ignored,
}

pub struct EventRouter {
    partition: InstancePartition,
    pool: LanePool<RoomEventNotification>,
}

impl EventRouter {
    pub fn start(
        config: &PipelineConfig,
        partition: InstancePartition,
        builder: Arc<FriendshipGraphBuilder>,
    ) -> Self {
        Self {
            partition,
            pool: LanePool::spawn("room", config.room_lanes, config.queue_capacity, builder),
        }
    }

    pub fn lanes(&self) -> usize {
        self.pool.lanes()
    }

    /// Parse one bus payload and hand it to its room's lane.
    pub async fn on_message(&self, payload: &[u8]) -> Result<Dispatch, PipelineError> {
        let result = self.route(payload).await;
        if let Err(e) = &result {
            tracing::warn!(
                name = "router.message_dropped",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %e,
                bytes = payload.len(),
                message = "dropping inbound message"
            );
        }
        result
    }

    async fn route(&self, payload: &[u8]) -> Result<Dispatch, PipelineError> {
        let output: OutputEvent = serde_json::from_slice(payload)
            .map_err(|e| PipelineError::MalformedMessage(e.to_string()))?;

        if output.output_type != OUTPUT_TYPE_NEW_ROOM_EVENT {
            tracing::debug!(output_type = %output.output_type, "ignoring non room event output");
            return Ok(Dispatch::Ignored);
        }
        let new_event = output.new_room_event.ok_or_else(|| {
            PipelineError::MalformedMessage("new_room_event payload missing".into())
        })?;

        let relate_joined: Vec<String> = new_event
            .joined
            .iter()
            .filter(|user| self.partition.is_related(user))
            .cloned()
            .collect();

        if relate_joined.is_empty() && !new_event.event.is_membership() {
            return Ok(Dispatch::Filtered);
        }

        let room_id = new_event.event.room_id.clone();
        let lane = self
            .pool
            .dispatch(
                &room_id,
                RoomEventNotification {
                    event: Arc::new(new_event.event),
                    joined: new_event.joined,
                    relate_joined,
                },
            )
            .await?;
        Ok(Dispatch::Routed { lane })
    }

    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}
