//! JSON response envelope, HTTP error mapping and auth extractors.

use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use huddle_core::{HubError, Identity, Role};
use serde::Serialize;

use crate::auth::extract_credential;
use crate::server::AppState;

/// `{success, message, data}` body used by every JSON route.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Payload, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Successful response carrying `data`.
    pub fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data: Some(data),
        })
    }
}

/// An error rendered as a failed [`ApiResponse`].
#[derive(Debug, thiserror::Error)]
#[error("{status}: {message}")]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Build an error with an explicit status.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 400.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 401.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// 403.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    /// HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        let status = match &err {
            HubError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            HubError::NotAMember { .. } => StatusCode::FORBIDDEN,
            HubError::InvalidEnvelope(_) => StatusCode::BAD_REQUEST,
            HubError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            HubError::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            HubError::SlowConsumer(_) | HubError::ConnectionClosed => StatusCode::GONE,
        };
        Self::new(status, err.client_message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            message: self.message,
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Caller identity taken from a bearer header or `?token=`.
#[derive(Clone, Copy, Debug)]
pub struct Principal(pub Identity);

impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(credential) = extract_credential(&parts.headers, &parts.uri) else {
            return Err(ApiError::unauthorized("Authorization token required"));
        };
        let identity = state.verifier.authenticate(&credential).map_err(|e| {
            tracing::debug!(error = %e, "rejected credential");
            ApiError::unauthorized("Invalid or expired token")
        })?;
        Ok(Self(identity))
    }
}

/// A [`Principal`] holding the admin role.
#[derive(Clone, Copy, Debug)]
pub struct AdminPrincipal(pub Identity);

impl FromRequestParts<AppState> for AdminPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Principal(identity) = Principal::from_request_parts(parts, state).await?;
        if identity.role != Role::Admin {
            return Err(ApiError::forbidden("Admin role required"));
        }
        Ok(Self(identity))
    }
}

#[cfg(test)]
mod tests {
    use huddle_core::{MemberAction, RoomId};

    use super::*;

    #[test]
    fn hub_errors_map_to_statuses() {
        let denied = ApiError::from(HubError::NotAMember {
            room_id: RoomId::new(1),
            action: MemberAction::Join,
        });
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        assert_eq!(denied.message, "You are not a member of this room");

        let store = ApiError::from(HubError::store("disk"));
        assert_eq!(store.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(store.message, "Failed to send message");
    }

    #[tokio::test]
    async fn error_body_is_failed_envelope() {
        let resp = ApiError::bad_request("nope").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["success"], false);
        assert_eq!(parsed["message"], "nope");
        assert!(parsed.get("data").is_none());
    }

    #[test]
    fn ok_envelope_carries_data() {
        let Json(body) = ApiResponse::ok("done", vec![1, 2]);
        let parsed = serde_json::to_value(&body).unwrap();
        assert_eq!(parsed["success"], true);
        assert_eq!(parsed["data"], serde_json::json!([1, 2]));
    }
}
