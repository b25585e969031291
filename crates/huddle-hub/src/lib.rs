//! # huddle-hub
//!
//! In-memory core of the chat hub.
//!
//! - [`registry`] - live connections, room membership and the per-user index,
//!   all behind one lock
//! - [`broadcaster`] - ordered per-room pipelines with slow-consumer eviction
//! - [`membership_cache`] - TTL cache in front of the membership oracle
//! - [`dispatcher`] - bounded inbound queue and worker pool
//! - [`hub`] - the [`Hub`] handle that wires them together

#![deny(unsafe_code)]

pub mod broadcaster;
pub mod connection;
pub mod dispatcher;
pub mod hub;
pub mod membership_cache;
pub mod metrics;
pub mod registry;

pub use broadcaster::{EnqueueOutcome, RoomBroadcaster};
pub use connection::{Connection, ConnectionState, Frame, SendOutcome};
pub use dispatcher::{InboundHandler, InboundQueue, InboundTask, WorkerPool};
pub use hub::{Hub, HubConfig, HubTasks, MAX_POSTED_CHARS};
pub use membership_cache::{CachedMembership, MembershipCache};
pub use registry::{JoinOutcome, LeaveOutcome, Registry, RoomMemberInfo, RoomStatus, Unregistered};
