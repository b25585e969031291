//! Room repository: rooms and their member lists.

use chrono::Utc;
use huddle_core::{RoomId, UserId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::{Result, StoreError};
use crate::sqlite::repositories::parse_user;

/// A row from the `rooms` table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomRow {
    /// Room id.
    pub id: RoomId,
    /// Unique display name.
    pub name: String,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// Room repository: stateless, every method takes `&Connection`.
pub struct RoomRepo;

impl RoomRepo {
    /// Create a room.
    pub fn create(conn: &Connection, name: &str) -> Result<RoomRow> {
        let now = Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO rooms (name, created_at) VALUES (?1, ?2)",
            params![name, now],
        )?;
        Ok(RoomRow {
            id: RoomId::new(conn.last_insert_rowid()),
            name: name.to_owned(),
            created_at: now,
        })
    }

    /// Look a room up by id.
    pub fn get(conn: &Connection, id: RoomId) -> Result<Option<RoomRow>> {
        let row = conn
            .query_row(
                "SELECT id, name, created_at FROM rooms WHERE id = ?1",
                params![id.get()],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// All rooms ordered by id.
    pub fn list(conn: &Connection) -> Result<Vec<RoomRow>> {
        let mut stmt = conn.prepare("SELECT id, name, created_at FROM rooms ORDER BY id")?;
        let rows = stmt
            .query_map([], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Add `user` to `room`. Returns `false` if already a member.
    pub fn add_member(conn: &Connection, room: RoomId, user: UserId) -> Result<bool> {
        if Self::get(conn, room)?.is_none() {
            return Err(StoreError::RoomNotFound(room.get()));
        }
        let changed = conn.execute(
            "INSERT OR IGNORE INTO room_members (room_id, user_uuid, joined_at)
             VALUES (?1, ?2, ?3)",
            params![room.get(), user.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    /// Remove `user` from `room`. Returns `false` if not a member.
    pub fn remove_member(conn: &Connection, room: RoomId, user: UserId) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM room_members WHERE room_id = ?1 AND user_uuid = ?2",
            params![room.get(), user.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Whether `user` belongs to `room`.
    pub fn is_member(conn: &Connection, room: RoomId, user: UserId) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM room_members WHERE room_id = ?1 AND user_uuid = ?2",
                params![room.get(), user.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Members of `room` in join order.
    pub fn members(conn: &Connection, room: RoomId) -> Result<Vec<UserId>> {
        let mut stmt = conn.prepare(
            "SELECT user_uuid FROM room_members WHERE room_id = ?1 ORDER BY joined_at, user_uuid",
        )?;
        let rows = stmt
            .query_map(params![room.get()], |row| parse_user(row, 0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoomRow> {
        Ok(RoomRow {
            id: RoomId::new(row.get(0)?),
            name: row.get(1)?,
            created_at: row.get(2)?,
        })
    }
}
