//! Collaborator interfaces consumed by the hub.
//!
//! The hub never talks to a database or a token library directly; it is
//! handed implementations of these traits at construction time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::ids::{RoomId, UserId};

/// Authoritative answer to "does this user belong to this room?".
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait MembershipOracle: Send + Sync {
    /// Whether `user` is a member of `room`.
    async fn is_member(&self, user: UserId, room: RoomId) -> Result<bool>;
}

/// Out-of-band membership changes (admin tooling).
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    /// Add `user` to `room`. Returns `false` if already a member.
    async fn add_member(&self, user: UserId, room: RoomId) -> Result<bool>;
    /// Remove `user` from `room`. Returns `false` if not a member.
    async fn remove_member(&self, user: UserId, room: RoomId) -> Result<bool>;
}

/// A chat message as recorded by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Store-assigned id.
    pub id: i64,
    /// Room the message was posted to.
    pub room_id: RoomId,
    /// Author.
    pub author_id: UserId,
    /// Message body.
    pub content: String,
    /// When the store recorded it.
    pub created_at: DateTime<Utc>,
}

/// Durable message persistence.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Record a message and return it with its assigned id and timestamp.
    async fn persist(&self, room: RoomId, author: UserId, content: String)
    -> Result<StoredMessage>;

    /// Most recent messages of `room`, newest first.
    async fn history(&self, room: RoomId, limit: u32, offset: u32) -> Result<Vec<StoredMessage>>;
}

/// Role carried by an authenticated identity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Regular chat user.
    #[default]
    User,
    /// Operator with access to admin routes.
    Admin,
}

impl Role {
    /// Parse the role claim; anything unrecognised is a regular user.
    pub fn from_claim(claim: Option<&str>) -> Self {
        match claim {
            Some(r) if r.eq_ignore_ascii_case("admin") => Self::Admin,
            _ => Self::User,
        }
    }
}

/// Who a connection belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Authenticated user.
    pub user_id: UserId,
    /// Granted role.
    pub role: Role,
}

/// Turns a credential into an identity.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
pub trait IdentityVerifier: Send + Sync {
    /// Verify `credential` and return who it belongs to.
    fn authenticate(&self, credential: &str) -> Result<Identity>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::HubError;

    #[test]
    fn role_claim_parsing() {
        assert_eq!(Role::from_claim(Some("Admin")), Role::Admin);
        assert_eq!(Role::from_claim(Some("admin")), Role::Admin);
        assert_eq!(Role::from_claim(Some("User")), Role::User);
        assert_eq!(Role::from_claim(None), Role::User);
    }

    #[tokio::test]
    async fn oracle_mock_is_usable_as_trait_object() {
        let mut oracle = MockMembershipOracle::new();
        let _ = oracle
            .expect_is_member()
            .returning(|_, room| Ok(room == RoomId::new(7)));
        let oracle: Box<dyn MembershipOracle> = Box::new(oracle);
        assert!(oracle.is_member(UserId::random(), RoomId::new(7)).await.unwrap());
        assert!(!oracle.is_member(UserId::random(), RoomId::new(8)).await.unwrap());
    }

    #[test]
    fn verifier_mock_propagates_errors() {
        let mut verifier = MockIdentityVerifier::new();
        let _ = verifier
            .expect_authenticate()
            .returning(|_| Err(HubError::Unauthorized("expired".into())));
        assert!(matches!(
            verifier.authenticate("tok"),
            Err(HubError::Unauthorized(_))
        ));
    }
}
