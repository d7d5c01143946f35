//! Decoded message envelopes and channel-member records (spec.md §3 "Event Model").

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Channel names are cloned into closures, registry keys, and error values
/// throughout the crate; wrapping them once avoids `String` clones scattered
/// across call sites and gives us a single place to derive [`ChannelType`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Channel type is derived once from the name prefix, never from a
    /// runtime class check (spec.md §9 "Variant types").
    pub fn kind(&self) -> ChannelType {
        if self.0.starts_with("private-") {
            ChannelType::Private
        } else if self.0.starts_with("presence-") {
            ChannelType::Presence
        } else {
            ChannelType::Public
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<T: Into<String>> From<T> for ChannelName {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Public,
    Private,
    Presence,
}

impl ChannelType {
    pub fn requires_auth(self) -> bool {
        !matches!(self, ChannelType::Public)
    }

    pub fn is_presence(self) -> bool {
        matches!(self, ChannelType::Presence)
    }
}

/// A member of a presence channel's roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<Value>,
}

/// `channel_data` sent by an inline-secret or endpoint auth response,
/// `{ "user_id": "...", "user_info"?: ... }` per spec.md §4.2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelData {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<Value>,
}

/// The `presence.hash` map carried by `subscription_succeeded` for presence
/// channels (spec.md §4.4).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PresenceHash {
    pub hash: HashMap<String, Option<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionSucceededData {
    #[serde(default)]
    pub presence: Option<PresenceHash>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberAddedData {
    pub user_id: String,
    #[serde(default)]
    pub user_info: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberRemovedData {
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionEstablishedData {
    pub socket_id: String,
}

/// A frame as it arrives over the wire: `{event, channel?, data?}`, where
/// `data` is itself JSON-encoded text (spec.md §6 "known server quirk").
#[derive(Debug, Clone, Deserialize)]
pub struct WireFrame {
    pub event: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl WireFrame {
    /// Returns the raw text of `data`, re-encoding it to a string if the
    /// server sent a JSON object directly instead of a JSON-encoded string.
    pub fn data_as_str(&self) -> Option<String> {
        match &self.data {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        }
    }

    /// Deserializes `data` into `T`, tolerating both the normal
    /// JSON-string-of-JSON quirk and a bare object.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.data {
            Some(Value::String(s)) => serde_json::from_str(s),
            Some(other) => serde_json::from_value(other.clone()),
            None => serde_json::from_str("null"),
        }
    }
}

/// What a handler actually receives for an event's payload, controlled by
/// `Options::attempt_to_return_json_object` (spec.md §8 round-trip property).
#[derive(Debug, Clone)]
pub enum Payload {
    Json(Value),
    Raw(String),
}

impl Payload {
    pub fn from_frame(frame: &WireFrame, attempt_to_return_json_object: bool) -> Option<Self> {
        let raw = frame.data_as_str()?;
        if attempt_to_return_json_object {
            match serde_json::from_str(&raw) {
                Ok(value) => Some(Payload::Json(value)),
                Err(_) => Some(Payload::Raw(raw)),
            }
        } else {
            Some(Payload::Raw(raw))
        }
    }
}

/// A stable, unique handle returned by `bind()`, used to `unbind()` exactly
/// one callback (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u64);

impl BindingId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binding-{}", self.0)
    }
}

pub mod wire_events {
    pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
    pub const ERROR: &str = "pusher:error";
    pub const SUBSCRIPTION_ERROR: &str = "pusher:subscription_error";
    pub const SUBSCRIBE: &str = "pusher:subscribe";
    pub const UNSUBSCRIBE: &str = "pusher:unsubscribe";
    pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
    pub const MEMBER_ADDED: &str = "pusher_internal:member_added";
    pub const MEMBER_REMOVED: &str = "pusher_internal:member_removed";
    pub const CLIENT_EVENT_PREFIX: &str = "client-";
}
