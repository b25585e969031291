//! WebSocket transport: per-connection pumps and the session that ties
//! them to the hub.

pub mod pumps;
pub mod session;
