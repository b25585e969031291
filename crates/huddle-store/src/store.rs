//! The pool-backed [`SqliteStore`] implementing the hub's
//! membership and message ports.
//!
//! `rusqlite` is blocking, so every port call hops onto the blocking pool.

use async_trait::async_trait;
use huddle_core::{
    HubError, MembershipDirectory, MembershipOracle, MessageStore, RoomId, StoredMessage, UserId,
};
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::sqlite::connection::ConnectionPool;
use crate::sqlite::repositories::{MessageRepo, RoomRepo};

/// Store handle shared by the hub and the HTTP layer.
#[derive(Clone)]
pub struct SqliteStore {
    pool: ConnectionPool,
}

impl SqliteStore {
    /// Wrap an already-migrated pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Underlying pool, for synchronous callers like the CLI.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Run `f` with a pooled connection on the blocking thread pool.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl MembershipOracle for SqliteStore {
    async fn is_member(&self, user: UserId, room: RoomId) -> huddle_core::Result<bool> {
        self.with_conn(move |conn| RoomRepo::is_member(conn, room, user))
            .await
            .map_err(|e| {
                warn!(user_id = %user, room_id = %room, error = %e, "membership lookup failed");
                HubError::membership(e)
            })
    }
}

#[async_trait]
impl MembershipDirectory for SqliteStore {
    async fn add_member(&self, user: UserId, room: RoomId) -> huddle_core::Result<bool> {
        let added = self
            .with_conn(move |conn| RoomRepo::add_member(conn, room, user))
            .await
            .map_err(HubError::membership)?;
        debug!(user_id = %user, room_id = %room, added, "room member added");
        Ok(added)
    }

    async fn remove_member(&self, user: UserId, room: RoomId) -> huddle_core::Result<bool> {
        let removed = self
            .with_conn(move |conn| RoomRepo::remove_member(conn, room, user))
            .await
            .map_err(HubError::membership)?;
        debug!(user_id = %user, room_id = %room, removed, "room member removed");
        Ok(removed)
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn persist(
        &self,
        room: RoomId,
        author: UserId,
        content: String,
    ) -> huddle_core::Result<StoredMessage> {
        self.with_conn(move |conn| MessageRepo::insert(conn, room, author, &content))
            .await
            .map_err(|e| {
                warn!(room_id = %room, user_id = %author, error = %e, "failed to persist message");
                HubError::store(e)
            })
    }

    async fn history(
        &self,
        room: RoomId,
        limit: u32,
        offset: u32,
    ) -> huddle_core::Result<Vec<StoredMessage>> {
        self.with_conn(move |conn| MessageRepo::list_recent(conn, room, limit, offset))
            .await
            .map_err(HubError::store)
    }
}
