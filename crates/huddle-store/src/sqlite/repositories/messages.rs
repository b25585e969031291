//! Message repository: append and page through chat history.

use chrono::Utc;
use huddle_core::{RoomId, StoredMessage, UserId};
use rusqlite::{Connection, params};

use crate::errors::Result;
use crate::sqlite::repositories::{parse_time, parse_user};

/// Message repository: stateless, every method takes `&Connection`.
pub struct MessageRepo;

impl MessageRepo {
    /// Append a message and return it as stored.
    pub fn insert(
        conn: &Connection,
        room: RoomId,
        author: UserId,
        content: &str,
    ) -> Result<StoredMessage> {
        let created_at = Utc::now();
        let _ = conn.execute(
            "INSERT INTO messages (room_id, user_uuid, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![room.get(), author.to_string(), content, created_at.to_rfc3339()],
        )?;
        Ok(StoredMessage {
            id: conn.last_insert_rowid(),
            room_id: room,
            author_id: author,
            content: content.to_owned(),
            created_at,
        })
    }

    /// Page of messages in `room`, newest first.
    pub fn list_recent(
        conn: &Connection,
        room: RoomId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>> {
        let mut stmt = conn.prepare(
            "SELECT id, room_id, user_uuid, content, created_at
             FROM messages WHERE room_id = ?1
             ORDER BY id DESC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(params![room.get(), limit, offset], |row| {
                Ok(StoredMessage {
                    id: row.get(0)?,
                    room_id: RoomId::new(row.get(1)?),
                    author_id: parse_user(row, 2)?,
                    content: row.get(3)?,
                    created_at: parse_time(row, 4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Number of messages in `room`.
    pub fn count(conn: &Connection, room: RoomId) -> Result<u64> {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE room_id = ?1",
            params![room.get()],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}
