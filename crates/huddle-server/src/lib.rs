//! # huddle-server
//!
//! Axum front end for the huddle chat hub: token-authenticated WebSocket
//! sessions, the history and admin HTTP routes, health and Prometheus
//! endpoints, logging setup and graceful shutdown.

#![deny(unsafe_code)]

pub mod api;
pub mod auth;
pub mod config;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::JwtVerifier;
pub use config::{PumpConfig, ServerConfig, hub_config};
pub use server::{AppState, HuddleServer};
pub use shutdown::{ShutdownCoordinator, wait_for_signal};
