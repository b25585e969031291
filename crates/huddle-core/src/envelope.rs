//! Wire envelope exchanged over the chat socket.
//!
//! Every frame in either direction is one JSON object:
//!
//! ```text
//! {"type": "...", "room_id": 7, "user_uuid": "...", "content"?: "...",
//!  "timestamp"?: "...", "data"?: {...}, "message_id"?: 42, "priority"?: 1}
//! ```
//!
//! `room_id` and `user_uuid` are always written (zero / nil when unset); the
//! remaining fields are omitted when empty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::ids::{RoomId, UserId};

/// Discriminant of an [`Envelope`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Client asks to subscribe to a room.
    JoinRoom,
    /// Client asks to unsubscribe from a room.
    LeaveRoom,
    /// Client posts a chat message to a joined room.
    SendMessage,
    /// Broadcast of a persisted chat message.
    NewMessage,
    /// Direct confirmation of a join/leave.
    RoomResponse,
    /// Direct error notice; the connection stays open.
    Error,
    /// Broadcast: a user joined the room.
    UserJoined,
    /// Broadcast: a user left the room.
    UserLeft,
    /// Anything else a client sends.
    #[serde(other)]
    Unknown,
}

impl EnvelopeKind {
    /// Wire name of the kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JoinRoom => "join_room",
            Self::LeaveRoom => "leave_room",
            Self::SendMessage => "send_message",
            Self::NewMessage => "new_message",
            Self::RoomResponse => "room_response",
            Self::Error => "error",
            Self::UserJoined => "user_joined",
            Self::UserLeft => "user_left",
            Self::Unknown => "unknown",
        }
    }
}

/// One message on the chat socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Target room (zero when not addressed to a room).
    #[serde(default)]
    pub room_id: RoomId,
    /// Originating user (nil for server notices).
    #[serde(default)]
    pub user_uuid: UserId,
    /// Free-form text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Server-side creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Opaque structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Persisted message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    /// Delivery priority hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl Envelope {
    /// Bare envelope of `kind` addressed to `room_id`.
    pub fn new(kind: EnvelopeKind, room_id: RoomId) -> Self {
        Self {
            kind,
            room_id,
            user_uuid: UserId::nil(),
            content: None,
            timestamp: None,
            data: None,
            message_id: None,
            priority: None,
        }
    }

    /// `error` notice carrying a client-facing message.
    pub fn error(room_id: RoomId, message: impl Into<String>) -> Self {
        Self {
            content: Some(message.into()),
            ..Self::new(EnvelopeKind::Error, room_id)
        }
    }

    /// `room_response` confirming a join or leave.
    pub fn room_response(room_id: RoomId, user: UserId, action: &str) -> Self {
        Self {
            user_uuid: user,
            content: Some(action.to_owned()),
            timestamp: Some(Utc::now()),
            data: Some(json!({ "action": action })),
            ..Self::new(EnvelopeKind::RoomResponse, room_id)
        }
    }

    /// `new_message` broadcast for a persisted chat message.
    pub fn new_message(
        room_id: RoomId,
        author: UserId,
        message_id: i64,
        content: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_uuid: author,
            content: Some(content),
            timestamp: Some(created_at),
            message_id: Some(message_id),
            ..Self::new(EnvelopeKind::NewMessage, room_id)
        }
    }

    /// `user_joined` broadcast.
    pub fn user_joined(room_id: RoomId, user: UserId) -> Self {
        Self::presence(EnvelopeKind::UserJoined, room_id, user)
    }

    /// `user_left` broadcast.
    pub fn user_left(room_id: RoomId, user: UserId) -> Self {
        Self::presence(EnvelopeKind::UserLeft, room_id, user)
    }

    fn presence(kind: EnvelopeKind, room_id: RoomId, user: UserId) -> Self {
        Self {
            user_uuid: user,
            timestamp: Some(Utc::now()),
            data: Some(json!({ "user_uuid": user })),
            ..Self::new(kind, room_id)
        }
    }

    /// Room this envelope addresses.
    ///
    /// Older clients put the room under `data.room_id`; the top-level field
    /// wins when both are present.
    pub fn target_room(&self) -> Option<RoomId> {
        if self.room_id.is_set() {
            return Some(self.room_id);
        }
        self.data
            .as_ref()
            .and_then(|d| d.get("room_id"))
            .and_then(Value::as_i64)
            .map(RoomId::new)
            .filter(|r| r.is_set())
    }

    /// Serialize to a JSON frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a JSON frame.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_join() {
        let env = Envelope::from_json(r#"{"type":"join_room","room_id":7}"#).unwrap();
        assert_eq!(env.kind, EnvelopeKind::JoinRoom);
        assert_eq!(env.target_room(), Some(RoomId::new(7)));
        assert!(env.user_uuid.is_nil());
    }

    #[test]
    fn room_falls_back_to_data_payload() {
        let env =
            Envelope::from_json(r#"{"type":"leave_room","data":{"room_id":9}}"#).unwrap();
        assert_eq!(env.target_room(), Some(RoomId::new(9)));
    }

    #[test]
    fn missing_room_is_none() {
        let env = Envelope::from_json(r#"{"type":"send_message","content":"hi"}"#).unwrap();
        assert_eq!(env.target_room(), None);
    }

    #[test]
    fn unknown_kind_is_tolerated() {
        let env = Envelope::from_json(r#"{"type":"typing","room_id":1}"#).unwrap();
        assert_eq!(env.kind, EnvelopeKind::Unknown);
    }

    #[test]
    fn missing_type_is_rejected() {
        assert!(Envelope::from_json(r#"{"room_id":1}"#).is_err());
        assert!(Envelope::from_json("not json").is_err());
    }

    #[test]
    fn error_envelope_omits_empty_fields() {
        let json: Value =
            serde_json::from_str(&Envelope::error(RoomId::default(), "nope").to_json().unwrap())
                .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["content"], "nope");
        assert_eq!(json["room_id"], 0);
        assert!(json.get("user_uuid").is_some());
        assert!(json.get("message_id").is_none());
        assert!(json.get("data").is_none());
        assert!(json.get("priority").is_none());
    }

    #[test]
    fn new_message_carries_id_and_rfc3339_timestamp() {
        let author = UserId::random();
        let at = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let env = Envelope::new_message(RoomId::new(7), author, 42, "hi".into(), at);
        let json: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "new_message");
        assert_eq!(json["message_id"], 42);
        assert_eq!(json["content"], "hi");
        assert_eq!(json["user_uuid"], author.to_string());
        assert!(json["timestamp"].as_str().unwrap().starts_with("2024-05-01T10:00:00"));
    }

    #[test]
    fn presence_payload_names_user() {
        let user = UserId::random();
        let env = Envelope::user_joined(RoomId::new(3), user);
        assert_eq!(env.kind, EnvelopeKind::UserJoined);
        assert_eq!(env.data.unwrap()["user_uuid"], user.to_string());
    }

    #[test]
    fn kind_names_match_wire() {
        for kind in [
            EnvelopeKind::JoinRoom,
            EnvelopeKind::LeaveRoom,
            EnvelopeKind::SendMessage,
            EnvelopeKind::NewMessage,
            EnvelopeKind::RoomResponse,
            EnvelopeKind::Error,
            EnvelopeKind::UserJoined,
            EnvelopeKind::UserLeft,
        ] {
            let wire = serde_json::to_value(kind).unwrap();
            assert_eq!(wire, kind.as_str());
        }
    }
}
