//! # huddle-core
//!
//! Shared vocabulary for the huddle chat hub:
//!
//! - [`ids`] - connection, user and room identifiers
//! - [`envelope`] - the JSON frame exchanged with clients
//! - [`errors`] - [`HubError`] and the client-facing error texts
//! - [`ports`] - traits for the membership oracle, message store and
//!   identity verifier the hub is built on

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod ports;

pub use envelope::{Envelope, EnvelopeKind};
pub use errors::{HubError, MemberAction, Result, UpstreamKind};
pub use ids::{ConnectionId, RoomId, UserId};
pub use ports::{
    Identity, IdentityVerifier, MembershipDirectory, MembershipOracle, MessageStore, Role,
    StoredMessage,
};
