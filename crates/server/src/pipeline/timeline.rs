//! User-keyed timeline inserts.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;

use super::lanes::{LaneHandler, LanePool};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::events::ClientEvent;
use crate::storage::{SequenceGenerator, TimelineStore};

/// One insert, answered exactly once through `reply`.
pub struct TimelineInsertRequest {
    pub event: Arc<ClientEvent>,
    pub user: String,
    pub reply: oneshot::Sender<i64>,
}

/// Offset of an enqueued insert, available once the user's lane has
/// written it.
pub struct PendingInsert {
    rx: oneshot::Receiver<i64>,
}

impl PendingInsert {
    pub async fn offset(self) -> Result<i64, PipelineError> {
        self.rx.await.map_err(|_| PipelineError::InsertDropped)
    }
}

struct TimelineWriter {
    seq: Arc<dyn SequenceGenerator>,
    store: Arc<dyn TimelineStore>,
}

#[async_trait]
impl LaneHandler<TimelineInsertRequest> for TimelineWriter {
    async fn handle(&self, req: TimelineInsertRequest) -> Result<(), PipelineError> {
        let offset = self.seq.next();
        // On a store error the reply is dropped and the caller sees InsertDropped.
        self.store.add_p2p_event(&req.event, offset, &req.user).await?;
        tracing::trace!(
            user = %req.user,
            room_id = %req.event.room_id,
            event_id = %req.event.event_id,
            offset,
            "timeline insert written"
        );
        // The caller may have stopped waiting; the write stands either way.
        let _ = req.reply.send(offset);
        Ok(())
    }
}

pub struct TimelineInsertRouter {
    pool: LanePool<TimelineInsertRequest>,
}

impl TimelineInsertRouter {
    pub fn start(
        config: &PipelineConfig,
        seq: Arc<dyn SequenceGenerator>,
        store: Arc<dyn TimelineStore>,
    ) -> Self {
        let writer = Arc::new(TimelineWriter { seq, store });
        Self {
            pool: LanePool::spawn(
                "timeline",
                config.user_lanes,
                config.queue_capacity,
                writer,
            ),
        }
    }

    pub fn lanes(&self) -> usize {
        self.pool.lanes()
    }

    /// Queue `event` for `user`'s timeline. Waits only while the user's lane
    /// is full; the offset is awaited separately through the returned value.
    pub async fn enqueue(
        &self,
        event: Arc<ClientEvent>,
        user: &str,
    ) -> Result<PendingInsert, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.pool
            .dispatch(
                user,
                TimelineInsertRequest {
                    event,
                    user: user.to_string(),
                    reply,
                },
            )
            .await?;
        Ok(PendingInsert { rx })
    }

    /// Insert and wait for the assigned offset.
    pub async fn insert(&self, event: Arc<ClientEvent>, user: &str) -> Result<i64, PipelineError> {
        self.enqueue(event, user).await?.offset().await
    }

    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}
