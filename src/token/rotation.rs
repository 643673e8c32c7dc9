// Expiry-triggered token rotation and the request guard built on it

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use secrecy::{ExposeSecret, Secret};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::api::responses::ApiError;
use crate::audit::logger::{AuditEvent, AuditSink};
use crate::auth::permissions::PermissionSource;
use crate::auth::user_store::UserStore;
use crate::core::errors::AuthError;
use crate::core::models::{CallerIdentity, TokenId, UserId};
use crate::token::store::{TokenStore, ACCESS_TOKEN_NAME};

/// Per-user rotation locks
///
/// Two requests carrying the same expired token must not both mint a
/// replacement. Serializing on the owning user (not the token id) also
/// covers a user presenting two distinct expired tokens at once.
#[derive(Default)]
struct UserLocks {
    inner: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    async fn acquire(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut inner = self.inner.lock().await;
            inner.entry(user_id).or_default().clone()
        };
        slot.lock_owned().await
    }
}

/// Outcome of guarding one request's credential
#[derive(Debug)]
pub enum RotationDecision {
    /// The presented token is live; the request proceeds under it
    PassThrough(CallerIdentity),
    /// The presented token had expired and was atomically replaced;
    /// `new_token` is the wire form the caller must switch to
    Replaced {
        identity: CallerIdentity,
        new_token: Secret<String>,
    },
}

/// Response extension handed to the refresh endpoint so it can echo the
/// replacement credential in its body
#[derive(Clone)]
pub struct RotatedBearer(pub Secret<String>);

/// Guards protected requests: authenticates the bearer token and, when
/// it has expired, swaps in a fresh one before the request runs.
pub struct TokenRotationGuard {
    tokens: Arc<dyn TokenStore>,
    users: Arc<dyn UserStore>,
    permissions: Arc<dyn PermissionSource>,
    sink: Arc<dyn AuditSink>,
    locks: UserLocks,
    token_ttl: Duration,
}

impl TokenRotationGuard {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        users: Arc<dyn UserStore>,
        permissions: Arc<dyn PermissionSource>,
        sink: Arc<dyn AuditSink>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            tokens,
            users,
            permissions,
            sink,
            locks: UserLocks::default(),
            token_ttl,
        }
    }

    /// Resolve a bearer credential to a caller identity
    ///
    /// A live token passes through untouched apart from a last-used
    /// stamp. An expired token is rotated: the record is atomically
    /// replaced with a fresh secret, current abilities, and a new
    /// expiry, and the caller gets the replacement back. Unknown or
    /// malformed tokens resolve to `AuthenticationRequired`; rotation
    /// infrastructure failures resolve to `RotationFailed` and leave
    /// the expired record in place.
    pub async fn authorize(
        &self,
        bearer: Option<&str>,
        request_id: &str,
    ) -> Result<RotationDecision, AuthError> {
        let bearer = bearer.ok_or(AuthError::AuthenticationRequired)?;

        let record = self
            .tokens
            .find_by_secret(bearer)
            .await?
            .ok_or(AuthError::AuthenticationRequired)?;

        if !record.is_expired(Utc::now()) {
            if let Err(e) = self.tokens.touch(record.id).await {
                warn!(token_id = record.id, error = %e, "Failed to stamp token last use");
            }
            return Ok(RotationDecision::PassThrough(CallerIdentity {
                user_id: record.user_id,
                token_id: record.id,
                abilities: record.abilities,
            }));
        }

        self.rotate(record.user_id, record.id, request_id).await
    }

    async fn rotate(
        &self,
        user_id: UserId,
        token_id: TokenId,
        request_id: &str,
    ) -> Result<RotationDecision, AuthError> {
        let _guard = self.locks.acquire(user_id).await;

        // Re-read under the lock: a concurrent request may have rotated
        // this token away while we were queued.
        let record = self
            .tokens
            .find_by_id(token_id)
            .await
            .map_err(|e| AuthError::RotationFailed(format!("token re-read failed: {}", e)))?
            // Consumed by the rotation that beat us; the caller must
            // retry with the replacement that request received.
            .ok_or(AuthError::AuthenticationRequired)?;

        // Resolve the replacement's owner and abilities before touching
        // storage; a failure here leaves the expired record in place so
        // a later request can retry the rotation.
        let user = self
            .users
            .find_by_id(user_id)
            .await
            .map_err(|e| AuthError::RotationFailed(format!("user lookup failed: {}", e)))?
            .ok_or_else(|| {
                AuthError::RotationFailed(format!("token owner {} no longer exists", user_id))
            })?;

        let abilities = self
            .permissions
            .abilities_for(&user)
            .await
            .map_err(|e| AuthError::RotationFailed(format!("permission lookup failed: {}", e)))?;

        let expires_at = Utc::now() + self.token_ttl;
        let issued = self
            .tokens
            .rotate(user_id, record.id, ACCESS_TOKEN_NAME, &abilities, Some(expires_at))
            .await
            .map_err(|e| AuthError::RotationFailed(format!("token swap failed: {}", e)))?
            .ok_or(AuthError::AuthenticationRequired)?;

        info!(
            user_id = user_id,
            replaced_token_id = record.id,
            token_id = issued.id,
            request_id = %request_id,
            "Rotated expired access token"
        );
        self.sink.record(
            AuditEvent::new(
                "token.rotated",
                json!({
                    "user_id": user_id,
                    "replaced_token_id": record.id,
                    "token_id": issued.id,
                }),
            )
            .with_request_id(request_id),
        );

        Ok(RotationDecision::Replaced {
            identity: CallerIdentity {
                user_id,
                token_id: issued.id,
                abilities,
            },
            new_token: Secret::new(issued.reveal().to_string()),
        })
    }
}

/// Extract the bearer credential from an Authorization header
fn bearer_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Axum middleware guarding protected routes
///
/// Request flow:
/// 1. Extract request ID from headers or generate UUID
/// 2. Extract bearer token from Authorization header
/// 3. Authorize through the rotation guard (rotating on expiry)
/// 4. Insert the caller identity into request extensions
/// 5. On rotation, also insert the replacement for the refresh handler
///    and echo it in the response Authorization header
pub async fn rotation_middleware(
    State(guard): State<Arc<TokenRotationGuard>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let bearer = bearer_from_headers(request.headers()).map(str::to_owned);

    let decision = guard
        .authorize(bearer.as_deref(), &request_id)
        .await
        .map_err(|e| ApiError::from_auth_error_with_id(e, request_id.clone()))?;

    match decision {
        RotationDecision::PassThrough(identity) => {
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        RotationDecision::Replaced { identity, new_token } => {
            request.extensions_mut().insert(identity);
            request
                .extensions_mut()
                .insert(RotatedBearer(new_token.clone()));

            let mut response = next.run(request).await;
            match HeaderValue::from_str(&format!("Bearer {}", new_token.expose_secret())) {
                Ok(value) => {
                    response.headers_mut().insert(header::AUTHORIZATION, value);
                }
                Err(e) => {
                    warn!(request_id = %request_id, error = %e, "Replacement token not header-safe");
                }
            }
            Ok(response)
        }
    }
}
