//! Room records and the read-only views handed out by the registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use huddle_core::{ConnectionId, Envelope, RoomId, UserId};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::connection::Connection;

/// Sending half of a room's ordered pipeline.
pub type PipelineSender = mpsc::Sender<Envelope>;

/// A room with at least one member.
///
/// The record owns the pipeline sender; dropping the record closes the
/// pipeline. `epoch` distinguishes this incarnation of the room from any
/// later one created under the same id.
pub(crate) struct RoomRecord {
    pub(crate) epoch: u64,
    pub(crate) members: HashMap<ConnectionId, Arc<Connection>>,
    pub(crate) pipeline: Option<PipelineSender>,
}

impl RoomRecord {
    pub(crate) fn new(epoch: u64) -> Self {
        Self {
            epoch,
            members: HashMap::new(),
            pipeline: None,
        }
    }

    pub(crate) fn status(&self, room_id: RoomId) -> RoomStatus {
        let mut members: Vec<RoomMemberInfo> = self
            .members
            .values()
            .map(|c| RoomMemberInfo {
                connection_id: c.id().clone(),
                user_id: c.user_id(),
                connected_secs: c.age().as_secs(),
                idle_secs: c.last_pong_elapsed().as_secs(),
            })
            .collect();
        members.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        let unique_users: HashSet<UserId> = members.iter().map(|m| m.user_id).collect();
        RoomStatus {
            room_id,
            exists: true,
            member_count: members.len(),
            unique_user_count: unique_users.len(),
            members,
        }
    }
}

/// One subscribed connection in a [`RoomStatus`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoomMemberInfo {
    /// Connection id.
    pub connection_id: ConnectionId,
    /// Owning user.
    pub user_id: UserId,
    /// Seconds since the connection opened.
    pub connected_secs: u64,
    /// Seconds since the last pong.
    pub idle_secs: u64,
}

/// Point-in-time view of a room for operators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoomStatus {
    /// Room queried.
    pub room_id: RoomId,
    /// Whether the room currently has a record.
    pub exists: bool,
    /// Subscribed connections.
    pub member_count: usize,
    /// Distinct users among them.
    pub unique_user_count: usize,
    /// Members ordered by connection id.
    pub members: Vec<RoomMemberInfo>,
}

impl RoomStatus {
    /// Status of a room with no record.
    pub fn absent(room_id: RoomId) -> Self {
        Self {
            room_id,
            exists: false,
            member_count: 0,
            unique_user_count: 0,
            members: Vec::new(),
        }
    }
}
