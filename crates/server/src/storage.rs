//! Storage seams used by the pipeline, plus in-memory implementations.
//!
//! The persistent backends live outside this crate; the memory stores back
//! the standalone binary and the tests.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::PipelineError;
use crate::events::ClientEvent;

#[async_trait]
pub trait TimelineStore: Send + Sync {
    /// Append `event` to `user_id`'s personal timeline at `offset`.
    async fn add_p2p_event(
        &self,
        event: &ClientEvent,
        offset: i64,
        user_id: &str,
    ) -> Result<(), PipelineError>;
}

#[async_trait]
pub trait FriendshipStore: Send + Sync {
    /// Record that `a` and `b` can see each other. Returns `true` only for
    /// the caller that recorded the pair first.
    async fn add_friendship(&self, a: &str, b: &str) -> Result<bool, PipelineError>;
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Most recent presence event cached for `user_id`.
    async fn latest_presence(&self, user_id: &str) -> Option<ClientEvent>;

    /// Replace the cached presence of `user_id`.
    async fn record_presence(&self, user_id: &str, event: ClientEvent) -> Result<(), PipelineError>;
}

pub trait SequenceGenerator: Send + Sync {
    fn next(&self) -> i64;
}

/// Monotonic offsets starting at 1.
#[derive(Debug, Default)]
pub struct AtomicSequence {
    last: AtomicI64,
}

impl AtomicSequence {
    pub fn starting_after(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }
}

impl SequenceGenerator for AtomicSequence {
    fn next(&self) -> i64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Unordered user pair; `(a, b)` and `(b, a)` compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FriendshipEdge {
    low: String,
    high: String,
}

impl FriendshipEdge {
    pub fn new(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low: low.to_string(),
            high: high.to_string(),
        }
    }

    pub fn users(&self) -> (&str, &str) {
        (&self.low, &self.high)
    }
}

#[derive(Debug, Default)]
pub struct MemoryFriendshipStore {
    edges: DashSet<FriendshipEdge>,
}

impl MemoryFriendshipStore {
    pub fn contains(&self, a: &str, b: &str) -> bool {
        self.edges.contains(&FriendshipEdge::new(a, b))
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[async_trait]
impl FriendshipStore for MemoryFriendshipStore {
    async fn add_friendship(&self, a: &str, b: &str) -> Result<bool, PipelineError> {
        Ok(self.edges.insert(FriendshipEdge::new(a, b)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimelineEntry {
    pub room_id: String,
    pub event_id: String,
    pub offset: i64,
}

/// Keeps every entry for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryTimelineStore {
    timelines: DashMap<String, Vec<TimelineEntry>>,
}

impl MemoryTimelineStore {
    pub fn timeline(&self, user_id: &str) -> Vec<TimelineEntry> {
        self.timelines
            .get(user_id)
            .map(|t| t.value().clone())
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.timelines.iter().map(|t| t.value().len()).sum()
    }
}

#[async_trait]
impl TimelineStore for MemoryTimelineStore {
    async fn add_p2p_event(
        &self,
        event: &ClientEvent,
        offset: i64,
        user_id: &str,
    ) -> Result<(), PipelineError> {
        self.timelines
            .entry(user_id.to_string())
            .or_default()
            .push(TimelineEntry {
                room_id: event.room_id.clone(),
                event_id: event.event_id.clone(),
                offset,
            });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryPresenceStore {
    latest: DashMap<String, ClientEvent>,
}

impl MemoryPresenceStore {
    pub fn set(&self, user_id: &str, event: ClientEvent) {
        self.latest.insert(user_id.to_string(), event);
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn latest_presence(&self, user_id: &str) -> Option<ClientEvent> {
        self.latest.get(user_id).map(|e| e.value().clone())
    }

    async fn record_presence(&self, user_id: &str, event: ClientEvent) -> Result<(), PipelineError> {
        self.set(user_id, event);
        Ok(())
    }
}
