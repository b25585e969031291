//! HS256 bearer tokens.
//!
//! Tokens carry the user id in `user_uuid` (mirrored in `sub`) and an
//! optional `role`; `"Admin"` unlocks the admin routes.

use axum::extract::Query;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Uri};
use chrono::Utc;
use huddle_core::{HubError, Identity, IdentityVerifier, Role, UserId};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Ten years.
const MAX_TTL_HOURS: u64 = 24 * 365 * 10;

/// JWT claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub user_uuid: String,
    /// Contact address, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// `"Admin"` or `"User"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Subject; same as `user_uuid`.
    pub sub: String,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
}

/// Verifies and issues HS256 tokens with a shared secret.
pub struct JwtVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: chrono::Duration,
}

impl JwtVerifier {
    /// Create a verifier whose issued tokens live for `ttl_hours`.
    pub fn new(secret: &str, ttl_hours: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: chrono::Duration::hours(ttl_hours.min(MAX_TTL_HOURS) as i64),
        }
    }

    /// Sign a token for `user`.
    pub fn issue(
        &self,
        user: UserId,
        role: Role,
        email: Option<&str>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = Claims {
            user_uuid: user.to_string(),
            email: email.map(str::to_owned),
            role: Some(role_claim(role).to_owned()),
            sub: user.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    /// Decode and validate a token without mapping it to an identity.
    pub fn claims(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding, &self.validation).map(|data| data.claims)
    }
}

impl IdentityVerifier for JwtVerifier {
    fn authenticate(&self, credential: &str) -> huddle_core::Result<Identity> {
        let claims = self
            .claims(credential)
            .map_err(|e| HubError::Unauthorized(format!("invalid token: {e}")))?;
        let user: UserId = claims
            .user_uuid
            .parse()
            .map_err(|_| HubError::Unauthorized("invalid user_uuid claim".into()))?;
        if user.is_nil() {
            return Err(HubError::Unauthorized("invalid user_uuid claim".into()));
        }
        Ok(Identity {
            user_id: user,
            role: Role::from_claim(claims.role.as_deref()),
        })
    }
}

fn role_claim(role: Role) -> &'static str {
    match role {
        Role::Admin => "Admin",
        Role::User => "User",
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Pull a credential from `Authorization: Bearer …`, falling back to the
/// percent-decoded `token` query parameter of `uri`.
pub fn extract_credential(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_owned());
    }
    let Query(query) = Query::<TokenQuery>::try_from_uri(uri).ok()?;
    query.token.filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;

    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn issued_token_authenticates() {
        let verifier = JwtVerifier::new(SECRET, 24);
        let user = UserId::random();
        let token = verifier.issue(user, Role::Admin, Some("a@example.com")).unwrap();

        let identity = verifier.authenticate(&token).unwrap();
        assert_eq!(identity.user_id, user);
        assert_eq!(identity.role, Role::Admin);

        let claims = verifier.claims(&token).unwrap();
        assert_eq!(claims.sub, user.to_string());
        assert_eq!(claims.email.as_deref(), Some("a@example.com"));
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        let token = JwtVerifier::new("other", 1)
            .issue(UserId::random(), Role::User, None)
            .unwrap();
        assert_matches!(
            JwtVerifier::new(SECRET, 1).authenticate(&token),
            Err(HubError::Unauthorized(_))
        );
    }

    #[test]
    fn expired_token_is_unauthorized() {
        let verifier = JwtVerifier::new(SECRET, 1);
        let now = Utc::now().timestamp();
        let user = UserId::random().to_string();
        let claims = Claims {
            user_uuid: user.clone(),
            email: None,
            role: None,
            sub: user,
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert_matches!(verifier.authenticate(&token), Err(HubError::Unauthorized(_)));
    }

    #[test]
    fn garbage_user_claim_is_unauthorized() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_uuid: "not-a-uuid".into(),
            email: None,
            role: Some("Admin".into()),
            sub: "x".into(),
            iat: now,
            exp: now + 60,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert_matches!(
            JwtVerifier::new(SECRET, 1).authenticate(&token),
            Err(HubError::Unauthorized(_))
        );
    }

    #[test]
    fn missing_role_is_regular_user() {
        let verifier = JwtVerifier::new(SECRET, 1);
        let token = verifier.issue(UserId::random(), Role::User, None).unwrap();
        assert_eq!(verifier.authenticate(&token).unwrap().role, Role::User);
    }

    #[test]
    fn credential_from_header_wins_over_query() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(
            extract_credential(&headers, &Uri::from_static("/ws?token=xyz")).as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn credential_from_query() {
        let headers = HeaderMap::new();
        let from = |uri: &'static str| extract_credential(&headers, &Uri::from_static(uri));
        assert_eq!(from("/ws?room=1&token=xyz").as_deref(), Some("xyz"));
        assert_eq!(from("/ws?token=").as_deref(), None);
        assert_eq!(from("/ws").as_deref(), None);
    }

    #[test]
    fn query_credential_is_percent_decoded() {
        let headers = HeaderMap::new();
        let uri = Uri::from_static("/ws?token=eyJ%2Eabc%2Edef&room=2");
        assert_eq!(extract_credential(&headers, &uri).as_deref(), Some("eyJ.abc.def"));
    }

    #[test]
    fn non_bearer_header_is_ignored() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert_eq!(extract_credential(&headers, &Uri::from_static("/ws")), None);
    }
}
