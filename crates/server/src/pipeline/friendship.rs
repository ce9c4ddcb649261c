//! Per-room-event handler: visibility graph updates and timeline fan-out.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::lanes::LaneHandler;
use super::notifier::{CrossDomainNotifier, PushSet};
use super::partition::InstancePartition;
use super::router::RoomEventNotification;
use super::timeline::TimelineInsertRouter;
use crate::error::PipelineError;
use crate::events::{ClientEvent, MemberContent, domain_from_id};
use crate::storage::FriendshipStore;

const JOIN: &str = "join";

pub struct FriendshipGraphBuilder {
    partition: InstancePartition,
    server_names: BTreeSet<String>,
    friendships: Arc<dyn FriendshipStore>,
    timeline: Arc<TimelineInsertRouter>,
    notifier: Arc<CrossDomainNotifier>,
}

impl FriendshipGraphBuilder {
    pub fn new(
        partition: InstancePartition,
        server_names: impl IntoIterator<Item = String>,
        friendships: Arc<dyn FriendshipStore>,
        timeline: Arc<TimelineInsertRouter>,
        notifier: Arc<CrossDomainNotifier>,
    ) -> Self {
        Self {
            partition,
            server_names: server_names.into_iter().collect(),
            friendships,
            timeline,
            notifier,
        }
    }

    fn is_local(&self, domain: &str) -> bool {
        self.server_names.contains(domain)
    }

    fn user_domain<'a>(user: &'a str) -> Result<&'a str, PipelineError> {
        domain_from_id(user)
            .ok_or_else(|| PipelineError::MalformedMessage(format!("invalid user id {user:?}")))
    }

    /// Record edges for `joiner`, adding to `pushes` the profile pushes that
    /// newly recorded cross-domain edges call for.
    ///
    /// A malformed member id is skipped. A store failure does not stop the
    /// remaining members; the first one is returned once every member has
    /// been tried, and `pushes` still holds what was recorded.
    async fn record_join(
        &self,
        joiner: &str,
        notification: &RoomEventNotification,
        pushes: &mut PushSet,
    ) -> Result<(), PipelineError> {
        let joiner_domain = Self::user_domain(joiner)?;
        let joiner_local = self.is_local(joiner_domain);
        let mut first_error = None;

        for member in &notification.relate_joined {
            if member == joiner {
                continue;
            }
            let Some(member_domain) = self.member_domain(member, notification) else {
                continue;
            };
            let recorded = match self.friendships.add_friendship(member, joiner).await {
                Ok(recorded) => recorded,
                Err(e) => {
                    tracing::warn!(member = %member, joiner = %joiner, error = %e, "failed to record friendship");
                    first_error = first_error.or(Some(e));
                    continue;
                }
            };
            if !recorded {
                continue;
            }
            let member_local = self.is_local(member_domain);
            if member_local == joiner_local {
                continue;
            }
            let (foreign_domain, local_user) = if joiner_local {
                (member_domain, joiner)
            } else {
                (joiner_domain, member.as_str())
            };
            pushes
                .entry(foreign_domain.to_string())
                .or_default()
                .insert(local_user.to_string());
        }

        if self.partition.is_related(joiner) {
            for member in notification.joined.iter().filter(|m| *m != joiner) {
                if self.member_domain(member, notification).is_none() {
                    continue;
                }
                if let Err(e) = self.friendships.add_friendship(joiner, member).await {
                    tracing::warn!(member = %member, joiner = %joiner, error = %e, "failed to record friendship");
                    first_error = first_error.or(Some(e));
                }
            }
        }

        tracing::debug!(
            room_id = %notification.event.room_id,
            event_id = %notification.event.event_id,
            joiner = %joiner,
            pushes = pushes.values().map(BTreeSet::len).sum::<usize>(),
            "friendships recorded for join"
        );
        first_error.map_or(Ok(()), Err)
    }

    fn member_domain<'a>(
        &self,
        member: &'a str,
        notification: &RoomEventNotification,
    ) -> Option<&'a str> {
        let domain = domain_from_id(member);
        if domain.is_none() {
            tracing::warn!(
                room_id = %notification.event.room_id,
                event_id = %notification.event.event_id,
                member = %member,
                "skipping joined member with invalid user id"
            );
        }
        domain
    }

    async fn fan_out(
        &self,
        event: &Arc<ClientEvent>,
        users: impl Iterator<Item = &String>,
    ) -> Result<(), PipelineError> {
        let results = join_all(users.map(|user| self.timeline.insert(event.clone(), user))).await;
        results.into_iter().try_for_each(|r| r.map(|_| ()))
    }
}

#[async_trait]
impl LaneHandler<RoomEventNotification> for FriendshipGraphBuilder {
    async fn handle(&self, notification: RoomEventNotification) -> Result<(), PipelineError> {
        let event = notification.event.clone();
        let mut already_written: Option<&str> = None;
        let mut pushes = PushSet::new();
        let mut recorded = Ok(());

        let membership_target = event
            .state_key
            .as_deref()
            .filter(|_| event.is_membership());
        if let Some(state_key) = membership_target {
            let member: MemberContent = serde_json::from_value(event.content.clone())
                .map_err(|e| PipelineError::MalformedMessage(format!("member content: {e}")))?;

            if member.membership != JOIN {
                if self.partition.is_related(state_key) {
                    let offset = self.timeline.insert(event.clone(), state_key).await?;
                    tracing::info!(
                        name = "friendship.membership_change",
                        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                        room_id = %event.room_id,
                        event_id = %event.event_id,
                        user_id = %state_key,
                        membership = %member.membership,
                        offset,
                        message = "membership change added to timeline"
                    );
                    already_written = Some(state_key);
                }
            } else {
                recorded = self.record_join(state_key, &notification, &mut pushes).await;
            }
        }

        let written = self
            .fan_out(
                &event,
                notification
                    .relate_joined
                    .iter()
                    .filter(|u| already_written != Some(u.as_str())),
            )
            .await;

        // Edges recorded above are never recorded again, so their pushes go
        // out whatever happened to the writes.
        if !pushes.is_empty() {
            self.notifier.notify(pushes).await;
        }
        recorded.and(written)
    }
}
