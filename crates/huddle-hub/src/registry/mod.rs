//! Connection registry and room index.
//!
//! Three maps describe who is where:
//!
//! - `connections`: connection id → connection + the rooms it joined
//! - `rooms`: room id → room record (members + pipeline)
//! - `user_rooms`: user id → room id → the user's connection in that room
//!
//! A connection is a member of room `r` iff `r` is in its joined set iff
//! `user_rooms[user][r]` names it. All three maps sit behind one lock and
//! every mutation updates them inside a single write section.

mod rooms;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use huddle_core::{ConnectionId, HubError, RoomId, UserId};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tracing::debug;

use crate::connection::{Connection, ConnectionState};

pub(crate) use rooms::RoomRecord;
pub use rooms::{PipelineSender, RoomMemberInfo, RoomStatus};

struct ConnectionEntry {
    conn: Arc<Connection>,
    rooms: BTreeSet<RoomId>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<RoomId, RoomRecord>,
    user_rooms: HashMap<UserId, HashMap<RoomId, ConnectionId>>,
    next_epoch: u64,
}

/// What [`Registry::unregister`] removed.
#[derive(Debug)]
pub struct Unregistered {
    /// The connection, now closed.
    pub connection: Arc<Connection>,
    /// Rooms it was a member of.
    pub rooms: Vec<RoomId>,
    /// Rooms that became empty and were torn down.
    pub torn_down: Vec<RoomId>,
}

/// What [`Registry::join`] changed.
#[derive(Debug, Default)]
pub struct JoinOutcome {
    /// The user's previous connection in this room, evicted and closed.
    pub evicted: Option<Unregistered>,
    /// The connection was already a member; nothing changed.
    pub already_member: bool,
    /// A new room record was created.
    pub created_room: bool,
}

/// What [`Registry::leave`] changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// The connection was a member before the call.
    pub was_member: bool,
    /// The room became empty and was torn down.
    pub torn_down: bool,
}

/// Live connections and room membership.
#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Registering the same connection twice is a no-op;
    /// a connection that has been unregistered cannot come back.
    pub fn register(&self, conn: &Arc<Connection>) -> huddle_core::Result<()> {
        let mut state = self.state.write();
        if state.connections.contains_key(conn.id()) {
            return Ok(());
        }
        if conn.is_closed() {
            return Err(HubError::ConnectionClosed);
        }
        let _ = state.connections.insert(
            conn.id().clone(),
            ConnectionEntry {
                conn: Arc::clone(conn),
                rooms: BTreeSet::new(),
            },
        );
        conn.set_state(ConnectionState::Registered);
        Ok(())
    }

    /// Remove a connection from every room, tear down rooms left empty and
    /// close its outbound buffer. Returns `None` if it was not registered.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Unregistered> {
        let mut state = self.state.write();
        state.remove_connection(id)
    }

    /// Subscribe `conn` to `room`.
    ///
    /// If the same user already has a different connection in `room`, that
    /// connection is unregistered first, in the same critical section.
    pub fn join(&self, room: RoomId, conn: &Arc<Connection>) -> huddle_core::Result<JoinOutcome> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if conn.is_closed() || !state.connections.contains_key(conn.id()) {
            return Err(HubError::ConnectionClosed);
        }

        let user = conn.user_id();
        let mut outcome = JoinOutcome::default();

        let existing = state
            .user_rooms
            .get(&user)
            .and_then(|rooms| rooms.get(&room))
            .cloned();
        match existing {
            Some(id) if &id == conn.id() => {
                outcome.already_member = true;
                return Ok(outcome);
            }
            Some(other) => {
                debug!(conn_id = %other, user_id = %user, room_id = %room, "evicting duplicate connection");
                outcome.evicted = state.remove_connection(&other);
            }
            None => {}
        }

        let record = match state.rooms.entry(room) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                state.next_epoch += 1;
                outcome.created_room = true;
                e.insert(RoomRecord::new(state.next_epoch))
            }
        };
        let _ = record.members.insert(conn.id().clone(), Arc::clone(conn));
        let _ = state
            .user_rooms
            .entry(user)
            .or_default()
            .insert(room, conn.id().clone());
        if let Some(entry) = state.connections.get_mut(conn.id()) {
            let _ = entry.rooms.insert(room);
        }
        conn.set_state(ConnectionState::Joined);
        Ok(outcome)
    }

    /// Unsubscribe a connection from `room`, tearing the room down if it
    /// becomes empty.
    pub fn leave(&self, room: RoomId, id: &ConnectionId) -> LeaveOutcome {
        let mut state = self.state.write();
        state.detach(room, id)
    }

    /// Whether connection `id` is subscribed to `room`.
    pub fn is_member(&self, room: RoomId, id: &ConnectionId) -> bool {
        self.state
            .read()
            .rooms
            .get(&room)
            .is_some_and(|r| r.members.contains_key(id))
    }

    /// Look up a registered connection.
    pub fn connection(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.state
            .read()
            .connections
            .get(id)
            .map(|e| Arc::clone(&e.conn))
    }

    /// The connection `user` has in `room`, if any.
    pub fn connection_for(&self, user: UserId, room: RoomId) -> Option<Arc<Connection>> {
        let state = self.state.read();
        let id = state.user_rooms.get(&user)?.get(&room)?;
        state.connections.get(id).map(|e| Arc::clone(&e.conn))
    }

    /// Rooms connection `id` has joined, in ascending order.
    pub fn joined_rooms(&self, id: &ConnectionId) -> Vec<RoomId> {
        self.state
            .read()
            .connections
            .get(id)
            .map(|e| e.rooms.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Current members of `room`, provided the room is still the
    /// incarnation identified by `epoch`.
    pub fn room_snapshot(&self, room: RoomId, epoch: u64) -> Option<Vec<Arc<Connection>>> {
        let state = self.state.read();
        let record = state.rooms.get(&room).filter(|r| r.epoch == epoch)?;
        Some(record.members.values().cloned().collect())
    }

    /// Epoch of the current incarnation of `room`.
    pub fn room_epoch(&self, room: RoomId) -> Option<u64> {
        self.state.read().rooms.get(&room).map(|r| r.epoch)
    }

    /// Whether `room` currently owns a pipeline.
    pub fn has_pipeline(&self, room: RoomId) -> bool {
        self.state
            .read()
            .rooms
            .get(&room)
            .is_some_and(|r| r.pipeline.is_some())
    }

    /// Pipeline of `room`, created with `spawn(epoch)` on first use.
    ///
    /// Returns `None` when the room has no record: messages for rooms with
    /// no members have nobody to reach.
    pub fn pipeline(
        &self,
        room: RoomId,
        spawn: impl FnOnce(u64) -> PipelineSender,
    ) -> Option<(PipelineSender, u64)> {
        let state = self.state.upgradable_read();
        let record = state.rooms.get(&room)?;
        if let Some(tx) = &record.pipeline {
            return Some((tx.clone(), record.epoch));
        }

        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        let record = state.rooms.get_mut(&room)?;
        let epoch = record.epoch;
        let tx = spawn(epoch);
        record.pipeline = Some(tx.clone());
        Some((tx, epoch))
    }

    /// Operator view of `room`.
    pub fn room_status(&self, room: RoomId) -> RoomStatus {
        self.state
            .read()
            .rooms
            .get(&room)
            .map_or_else(|| RoomStatus::absent(room), |r| r.status(room))
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.state.read().rooms.len()
    }

    /// Verify the cross-map invariant.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) -> std::result::Result<(), String> {
        self.state.read().check_invariants()
    }
}

impl RegistryState {
    fn remove_connection(&mut self, id: &ConnectionId) -> Option<Unregistered> {
        let entry = self.connections.get(id)?;
        let conn = Arc::clone(&entry.conn);
        conn.set_state(ConnectionState::Unregistering);

        let joined: Vec<RoomId> = entry.rooms.iter().copied().collect();
        let mut torn_down = Vec::new();
        for room in &joined {
            if self.detach(*room, id).torn_down {
                torn_down.push(*room);
            }
        }
        let _ = self.connections.remove(id);
        let _ = conn.close();

        Some(Unregistered {
            connection: conn,
            rooms: joined,
            torn_down,
        })
    }

    fn detach(&mut self, room: RoomId, id: &ConnectionId) -> LeaveOutcome {
        let Some(record) = self.rooms.get_mut(&room) else {
            return LeaveOutcome::default();
        };
        let Some(conn) = record.members.remove(id) else {
            return LeaveOutcome::default();
        };

        let torn_down = record.members.is_empty();
        if torn_down {
            // Dropping the record drops the pipeline sender.
            let _ = self.rooms.remove(&room);
            debug!(room_id = %room, "room torn down");
        }

        let user = conn.user_id();
        if let Some(rooms) = self.user_rooms.get_mut(&user) {
            if rooms.get(&room) == Some(id) {
                let _ = rooms.remove(&room);
            }
            if rooms.is_empty() {
                let _ = self.user_rooms.remove(&user);
            }
        }

        if let Some(entry) = self.connections.get_mut(id) {
            let _ = entry.rooms.remove(&room);
            if entry.rooms.is_empty() && conn.state() == ConnectionState::Joined {
                conn.set_state(ConnectionState::Registered);
            }
        }

        LeaveOutcome {
            was_member: true,
            torn_down,
        }
    }

    #[cfg(test)]
    fn check_invariants(&self) -> std::result::Result<(), String> {
        for (id, entry) in &self.connections {
            if entry.conn.id() != id {
                return Err(format!("{id} stored under the wrong key"));
            }
            for room in &entry.rooms {
                let in_room = self
                    .rooms
                    .get(room)
                    .is_some_and(|r| r.members.contains_key(id));
                if !in_room {
                    return Err(format!("{id} lists {room} but is not a member"));
                }
                let indexed = self
                    .user_rooms
                    .get(&entry.conn.user_id())
                    .and_then(|m| m.get(room));
                if indexed != Some(id) {
                    return Err(format!("{id} lists {room} but user index has {indexed:?}"));
                }
            }
        }
        for (room, record) in &self.rooms {
            if record.members.is_empty() {
                return Err(format!("room {room} retained while empty"));
            }
            for id in record.members.keys() {
                let listed = self
                    .connections
                    .get(id)
                    .is_some_and(|e| e.rooms.contains(room));
                if !listed {
                    return Err(format!("room {room} has member {id} that does not list it"));
                }
            }
        }
        for (user, rooms) in &self.user_rooms {
            if rooms.is_empty() {
                return Err(format!("empty user index for {user}"));
            }
            for (room, id) in rooms {
                let ok = self
                    .connections
                    .get(id)
                    .is_some_and(|e| e.conn.user_id() == *user && e.rooms.contains(room));
                if !ok {
                    return Err(format!("user index {user}/{room} points at stale {id}"));
                }
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
