//! Hub error taxonomy.
//!
//! Failures are scoped to one connection or one message. Only
//! [`HubError::Unauthorized`] ends a session before it starts; everything
//! else is reported back to the requesting client or logged.

use thiserror::Error;

use crate::ids::{ConnectionId, RoomId};

/// What a client was attempting when membership was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberAction {
    /// `join_room` denied by the membership oracle.
    Join,
    /// `send_message` to a room the connection never joined.
    Send,
}

/// Which collaborator failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpstreamKind {
    /// Membership oracle.
    Membership,
    /// Message store.
    Store,
}

/// Errors raised by the hub.
#[derive(Debug, Error)]
pub enum HubError {
    /// Missing or invalid credential at connect time.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Join or send without room membership.
    #[error("not a member of room {room_id} ({action:?})")]
    NotAMember {
        /// Room the client addressed.
        room_id: RoomId,
        /// What the client was doing.
        action: MemberAction,
    },

    /// The inbound queue was saturated and the envelope was dropped.
    #[error("inbound queue full")]
    QueueFull,

    /// Outbound buffer saturated; the connection gets evicted.
    #[error("slow consumer: {0}")]
    SlowConsumer(ConnectionId),

    /// Oracle or store call failed.
    #[error("upstream {kind:?} failure: {message}")]
    Upstream {
        /// Collaborator that failed.
        kind: UpstreamKind,
        /// Underlying error text (not shown to clients).
        message: String,
    },

    /// Envelope was addressed to no room or otherwise malformed.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Operation on a connection that is no longer registered.
    #[error("connection closed")]
    ConnectionClosed,
}

impl HubError {
    /// Upstream failure from the membership oracle.
    pub fn membership(err: impl std::fmt::Display) -> Self {
        Self::Upstream {
            kind: UpstreamKind::Membership,
            message: err.to_string(),
        }
    }

    /// Upstream failure from the message store.
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Upstream {
            kind: UpstreamKind::Store,
            message: err.to_string(),
        }
    }

    /// Text sent to the client in an `error` envelope.
    pub fn client_message(&self) -> String {
        match self {
            Self::Unauthorized(_) => "Unauthorized".into(),
            Self::NotAMember {
                action: MemberAction::Join,
                ..
            } => "You are not a member of this room".into(),
            Self::NotAMember {
                action: MemberAction::Send,
                ..
            } => "You must join the room first".into(),
            Self::QueueFull => "Server busy, message dropped".into(),
            Self::SlowConsumer(_) | Self::ConnectionClosed => "Connection closed".into(),
            Self::Upstream {
                kind: UpstreamKind::Membership,
                ..
            } => "Failed to check room membership".into(),
            Self::Upstream {
                kind: UpstreamKind::Store,
                ..
            } => "Failed to send message".into(),
            Self::InvalidEnvelope(reason) => reason.clone(),
        }
    }
}

/// Result type for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
