//! Request and response bodies of the server-to-server API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A room event as exchanged over federation. Only the identifiers are
/// typed; everything else is carried verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pdu {
    pub room_id: String,
    pub event_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub origin: String,
    pub destination: String,
    pub origin_server_ts: i64,
    #[serde(default)]
    pub pdus: Vec<Value>,
    #[serde(default)]
    pub edus: Vec<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RespDirectory {
    pub room_id: String,
    #[serde(default)]
    pub servers: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RespProfile {
    #[serde(default)]
    pub displayname: String,
    #[serde(default)]
    pub avatar_url: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RespAvatarUrl {
    #[serde(default)]
    pub avatar_url: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RespDisplayName {
    #[serde(default)]
    pub displayname: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RespState {
    #[serde(default)]
    pub auth_chain: Vec<Value>,
    #[serde(default)]
    pub pdus: Vec<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RespMediaInfo {
    #[serde(default)]
    pub media_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_size: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RespUserInfo {
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
pub struct BackfillResponse {
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub origin_server_ts: i64,
    #[serde(default)]
    pub pdus: Vec<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RespSend {
    #[serde(default)]
    pub pdus: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RespMakeJoin {
    #[serde(default)]
    pub room_version: String,
    #[serde(default)]
    pub event: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RespSendJoin {
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub state: Vec<Value>,
    #[serde(default)]
    pub auth_chain: Vec<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RespInvite {
    #[serde(default)]
    pub event: Value,
}

pub type RespMakeLeave = RespMakeJoin;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RespSendLeave {}

/// Parameters of a media download; `width` switches to the thumbnail endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MediaRequest {
    pub domain: String,
    pub media_id: String,
    pub width: Option<String>,
    pub method: Option<String>,
    pub file_type: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackfillDirection {
    #[default]
    Backward,
    Forward,
}

impl BackfillDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackfillDirection::Backward => "b",
            BackfillDirection::Forward => "f",
        }
    }
}
