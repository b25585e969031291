//! # huddle-store
//!
//! `SQLite` persistence for rooms, room membership and chat messages.
//!
//! - [`sqlite::connection`] - r2d2 pool with WAL and FK pragmas
//! - [`sqlite::migrations`] - embedded, versioned schema
//! - [`sqlite::repositories`] - stateless table repositories
//! - [`SqliteStore`] - async adapter implementing the hub's ports

#![deny(unsafe_code)]

pub mod errors;
pub mod sqlite;
pub mod store;

pub use errors::{Result, StoreError};
pub use sqlite::connection::{ConnectionConfig, ConnectionPool, new_file, new_in_memory};
pub use sqlite::migrations::run_migrations;
pub use sqlite::repositories::{MessageRepo, RoomRepo, RoomRow};
pub use store::SqliteStore;
