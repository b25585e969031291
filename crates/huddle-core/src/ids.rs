//! Identifier newtypes.
//!
//! Connections get a prefixed, time-ordered id (`conn_<uuid v7>`) minted by
//! the hub. Users and rooms arrive from the outside world: users are UUIDs
//! carried in the auth token, rooms are integer keys from the room store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a new id (`<prefix>_<uuid v7>`).
            #[must_use]
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7()))
            }

            /// Wrap an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

prefixed_id! {
    /// Unique identifier for one live transport session.
    ConnectionId, "conn"
}

/// Identifier of an authenticated user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Wrap a UUID.
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Random user id, handy for tooling and tests.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The nil id, used on envelopes that carry no author.
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Underlying UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Whether this is the nil id.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of a chat room.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(i64);

impl RoomId {
    /// Wrap a raw room key.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw room key.
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Rooms are keyed from 1; zero means "not set" on the wire.
    pub const fn is_set(self) -> bool {
        self.0 != 0
    }
}

impl From<i64> for RoomId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl FromStr for RoomId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_prefixed_and_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert!(a.as_str().starts_with("conn_"));
        assert_ne!(a, b);
    }

    #[test]
    fn connection_id_serializes_transparently() {
        let id = ConnectionId::from("conn_abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"conn_abc\"");
    }

    #[test]
    fn user_id_parses_and_displays() {
        let raw = "0190f5a2-6c1e-7a00-8000-000000000001";
        let id: UserId = raw.parse().unwrap();
        assert_eq!(id.to_string(), raw);
        assert!("not-a-uuid".parse::<UserId>().is_err());
    }

    #[test]
    fn user_id_default_is_nil() {
        assert!(UserId::default().is_nil());
        assert!(!UserId::random().is_nil());
    }

    #[test]
    fn room_id_roundtrips_as_number() {
        let id = RoomId::new(7);
        assert_eq!(serde_json::to_string(&id).unwrap(), "7");
        let back: RoomId = serde_json::from_str("7").unwrap();
        assert_eq!(back, id);
        assert!(id.is_set());
        assert!(!RoomId::default().is_set());
    }
}
