//! `HuddleServer`: axum HTTP + WebSocket front end of the hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, put};
use axum::Router;
use huddle_core::{IdentityVerifier, MembershipDirectory, RoomId, StoredMessage, UserId};
use huddle_hub::{Hub, RoomStatus};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api::{AdminPrincipal, ApiError, ApiResponse, Principal};
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::{ADMIN_MEMBERSHIP_CHANGES_TOTAL, WS_UNAUTHORIZED_TOTAL};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::serve_socket;

/// Default page size of the history route.
const DEFAULT_HISTORY_LIMIT: u32 = 50;
/// Largest page the history route returns.
const MAX_HISTORY_LIMIT: u32 = 100;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The chat hub.
    pub hub: Hub,
    /// Credential verification.
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Membership mutations for the admin routes.
    pub directory: Arc<dyn MembershipDirectory>,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
}

/// The huddle server.
pub struct HuddleServer {
    state: AppState,
}

impl HuddleServer {
    /// Create a new server around a running hub.
    pub fn new(
        config: ServerConfig,
        hub: Hub,
        verifier: Arc<dyn IdentityVerifier>,
        directory: Arc<dyn MembershipDirectory>,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            state: AppState {
                hub,
                verifier,
                directory,
                metrics,
                config: Arc::new(config),
                start_time: Instant::now(),
                shutdown: Arc::new(ShutdownCoordinator::new()),
            },
        }
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/api/v1/chat/ws", get(ws_handler))
            .route(
                "/api/v1/rooms/{room_id}/messages",
                get(history_handler).post(post_message_handler),
            )
            .route("/api/v1/admin/rooms/{room_id}/status", get(room_status_handler))
            .route(
                "/api/v1/admin/rooms/{room_id}/members/{user_uuid}",
                put(add_member_handler).delete(remove_member_handler),
            )
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve until the shutdown coordinator fires.
    ///
    /// Returns the bound address and the serving task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let config = &self.state.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "http server failed");
            }
        });
        info!(%addr, "huddle server listening");
        Ok((addr, handle))
    }

    /// Get the hub.
    pub fn hub(&self) -> &Hub {
        &self.state.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        &state.hub,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}

/// GET /api/v1/chat/ws
///
/// The credential is checked before the upgrade so unauthenticated clients
/// get a JSON 401 instead of a socket.
async fn ws_handler(
    State(state): State<AppState>,
    principal: Result<Principal, ApiError>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Principal(identity) = match principal {
        Ok(principal) => principal,
        Err(rejection) => {
            counter!(WS_UNAUTHORIZED_TOTAL).increment(1);
            return rejection.into_response();
        }
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let hub = state.hub.clone();
    let pumps = state.config.pump_config();
    let shutdown = state.shutdown.token();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| serve_socket(socket, hub, identity.user_id, pumps, shutdown))
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
    offset: Option<u32>,
}

impl HistoryQuery {
    fn page(&self) -> (u32, u32) {
        let limit = self
            .limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        (limit, self.offset.unwrap_or(0))
    }
}

/// GET /api/v1/rooms/{room_id}/messages
async fn history_handler(
    State(state): State<AppState>,
    Principal(identity): Principal,
    Path(room_id): Path<RoomId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<StoredMessage>>>, ApiError> {
    let (limit, offset) = query.page();
    let messages = state
        .hub
        .history(room_id, identity.user_id, limit, offset)
        .await?;
    Ok(ApiResponse::ok("Messages retrieved successfully", messages))
}

#[derive(Debug, Deserialize)]
struct PostMessage {
    content: String,
}

/// POST /api/v1/rooms/{room_id}/messages
async fn post_message_handler(
    State(state): State<AppState>,
    Principal(identity): Principal,
    Path(room_id): Path<RoomId>,
    body: Result<Json<PostMessage>, JsonRejection>,
) -> Result<Json<ApiResponse<StoredMessage>>, ApiError> {
    let Json(body) = body.map_err(|e| {
        tracing::debug!(error = %e, "rejected message body");
        ApiError::bad_request("invalid message content")
    })?;
    if !room_id.is_set() {
        return Err(ApiError::bad_request("invalid room ID"));
    }
    let message = state
        .hub
        .post_message(room_id, identity.user_id, body.content)
        .await?;
    Ok(ApiResponse::ok("Message sent successfully", message))
}

/// GET /api/v1/admin/rooms/{room_id}/status
async fn room_status_handler(
    State(state): State<AppState>,
    AdminPrincipal(_): AdminPrincipal,
    Path(room_id): Path<RoomId>,
) -> Json<ApiResponse<RoomStatus>> {
    ApiResponse::ok("Room status", state.hub.room_status(room_id))
}

/// Result of an admin membership change.
#[derive(Debug, Serialize)]
struct MembershipChange {
    room_id: RoomId,
    user_uuid: UserId,
    changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    disconnected: Option<bool>,
}

fn member_path(room_id: RoomId, user: UserId) -> Result<(RoomId, UserId), ApiError> {
    if !room_id.is_set() {
        return Err(ApiError::bad_request("room_id is required"));
    }
    if user.is_nil() {
        return Err(ApiError::bad_request("user_uuid is required"));
    }
    Ok((room_id, user))
}

/// PUT /api/v1/admin/rooms/{room_id}/members/{user_uuid}
async fn add_member_handler(
    State(state): State<AppState>,
    AdminPrincipal(admin): AdminPrincipal,
    Path((room_id, user)): Path<(RoomId, UserId)>,
) -> Result<Json<ApiResponse<MembershipChange>>, ApiError> {
    let (room_id, user) = member_path(room_id, user)?;
    let changed = state.directory.add_member(user, room_id).await?;
    state.hub.invalidate_membership(user, room_id);
    counter!(ADMIN_MEMBERSHIP_CHANGES_TOTAL, "action" => "add").increment(1);
    info!(admin = %admin.user_id, user_id = %user, room_id = %room_id, changed, "member added");

    let message = if changed { "Member added" } else { "Already a member" };
    Ok(ApiResponse::ok(
        message,
        MembershipChange {
            room_id,
            user_uuid: user,
            changed,
            disconnected: None,
        },
    ))
}

/// DELETE /api/v1/admin/rooms/{room_id}/members/{user_uuid}
async fn remove_member_handler(
    State(state): State<AppState>,
    AdminPrincipal(admin): AdminPrincipal,
    Path((room_id, user)): Path<(RoomId, UserId)>,
) -> Result<Json<ApiResponse<MembershipChange>>, ApiError> {
    let (room_id, user) = member_path(room_id, user)?;
    let changed = state.directory.remove_member(user, room_id).await?;
    state.hub.invalidate_membership(user, room_id);
    let disconnected = state.hub.kick(user, room_id);
    counter!(ADMIN_MEMBERSHIP_CHANGES_TOTAL, "action" => "remove").increment(1);
    info!(
        admin = %admin.user_id,
        user_id = %user,
        room_id = %room_id,
        changed,
        disconnected,
        "member removed"
    );

    let message = if changed { "Member removed" } else { "Not a member" };
    Ok(ApiResponse::ok(
        message,
        MembershipChange {
            room_id,
            user_uuid: user,
            changed,
            disconnected: Some(disconnected),
        },
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
