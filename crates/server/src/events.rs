//! Room events as seen by the sync aggregate, and the EDUs it emits.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MEMBER_EVENT_TYPE: &str = "m.room.member";
pub const PRESENCE_EVENT_TYPE: &str = "m.presence";
pub const OUTPUT_TYPE_NEW_ROOM_EVENT: &str = "new_room_event";
pub const PROFILE_EDU_TYPE: &str = "profile";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientEvent {
    pub room_id: String,
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub origin_server_ts: i64,
}

impl ClientEvent {
    pub fn is_membership(&self) -> bool {
        self.event_type == MEMBER_EVENT_TYPE
    }

    pub fn is_presence(&self) -> bool {
        self.event_type == PRESENCE_EVENT_TYPE
    }
}

/// Message published by the room server on the sync-aggregate topic.
#[derive(Clone, Debug, Deserialize)]
pub struct OutputEvent {
    #[serde(rename = "type")]
    pub output_type: String,
    #[serde(default)]
    pub new_room_event: Option<OutputNewRoomEvent>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OutputNewRoomEvent {
    pub event: ClientEvent,
    #[serde(default)]
    pub joined: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MemberContent {
    #[serde(default)]
    pub membership: String,
    #[serde(default)]
    pub displayname: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Content of a cached `m.presence` event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceContent {
    #[serde(default)]
    pub presence: String,
    #[serde(default)]
    pub status_msg: Option<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub displayname: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub job_number: String,
    #[serde(default)]
    pub mobile: String,
    #[serde(default)]
    pub landline: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileContent {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: String,
    pub presence: String,
    pub user_name: String,
    pub job_number: String,
    pub mobile: String,
    pub landline: String,
    pub email: String,
}

impl ProfileContent {
    pub fn from_presence(user_id: &str, presence: PresenceContent) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: presence.displayname,
            avatar_url: presence.avatar_url,
            presence: presence.presence,
            user_name: presence.user_name,
            job_number: presence.job_number,
            mobile: presence.mobile,
            landline: presence.landline,
            email: presence.email,
        }
    }
}

/// Unsigned, best-effort cross-domain push.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edu {
    #[serde(rename = "type")]
    pub edu_type: String,
    pub origin: String,
    pub destination: String,
    pub content: Value,
}

/// Server part of a Matrix identifier such as `@alice:example.org`.
pub fn domain_from_id(id: &str) -> Option<&str> {
    let mut chars = id.chars();
    match chars.next() {
        Some('@' | '!' | '#' | '$' | '+') => {}
        _ => return None,
    }
    id.split_once(':')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
}
