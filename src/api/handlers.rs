// Request handlers for API endpoints

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    Extension,
};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{info, warn};

use crate::api::responses::{
    ApiError, HealthResponse, LoginData, LoginResponse, MessageResponse, TokenResponse,
};
use crate::api::AppState;
use crate::auth::commands::{
    ForgetPassword, LoginOutcome, LoginUser, LogoutUser, RegisterUser, ResetLinkStatus,
    ResetPassword, ResetStatus, RevokeOutcome, UpdatePassword, UpdatePasswordOutcome,
    VerifyEmail, VerifyEmailOutcome,
};
use crate::core::models::{CallerIdentity, RequestContext, UserId};
use crate::token::rotation::RotatedBearer;

/// Request body for account registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Request body for login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for requesting a reset link
#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Request body for applying a password reset
#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub token: String,
    pub password: String,
}

/// Request body for changing the caller's password
#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Extract request ID from headers or generate UUID
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Handler for account registration
///
/// POST /v1/register
///
/// Dispatches RegisterUser and returns the first bearer token. A taken
/// email surfaces as the bus's duplicate-entry translation (422).
pub async fn register_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    let request_id = request_id(&headers);
    let ctx = RequestContext::new(request_id.clone());

    let issued = state
        .bus
        .dispatch(
            &ctx,
            RegisterUser { name: body.name, email: body.email, password: body.password },
        )
        .await
        .map_err(|e| ApiError::from_auth_error_with_id(e, request_id))?;

    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            message: "Account created".to_string(),
            access_token: issued.reveal().to_string(),
        }),
    ))
}

/// Handler for login
///
/// POST /v1/login
pub async fn login_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let request_id = request_id(&headers);
    let ctx = RequestContext::new(request_id.clone());

    let outcome = state
        .bus
        .dispatch(&ctx, LoginUser { email: body.email, password: body.password })
        .await
        .map_err(|e| ApiError::from_auth_error_with_id(e, request_id.clone()))?;

    match outcome {
        LoginOutcome::Granted { access_token } => Ok(Json(LoginResponse {
            message: "Login successful".to_string(),
            data: LoginData { access_token: access_token.reveal().to_string() },
        })),
        LoginOutcome::InvalidCredentials => Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "invalid_credentials",
            "Invalid credentials",
        )
        .with_request_id(request_id)),
    }
}

/// Handler for requesting a password-reset link
///
/// POST /v1/forgot-password
pub async fn forgot_password_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let request_id = request_id(&headers);
    let ctx = RequestContext::new(request_id.clone());

    let status = state
        .bus
        .dispatch(&ctx, ForgetPassword { email: body.email })
        .await
        .map_err(|e| ApiError::from_auth_error_with_id(e, request_id.clone()))?;

    match status {
        ResetLinkStatus::Sent => Ok(Json(MessageResponse {
            message: "Password reset link sent".to_string(),
        })),
        ResetLinkStatus::InvalidUser => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "invalid_user",
            "We can't find a user with that email address",
        )
        .with_request_id(request_id)),
        ResetLinkStatus::Throttled => Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "throttled",
            "Please wait before requesting another reset link",
        )
        .with_request_id(request_id)),
    }
}

/// Handler for applying a password reset
///
/// POST /v1/reset-password
pub async fn reset_password_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let request_id = request_id(&headers);
    let ctx = RequestContext::new(request_id.clone());

    let status = state
        .bus
        .dispatch(
            &ctx,
            ResetPassword { email: body.email, token: body.token, password: body.password },
        )
        .await
        .map_err(|e| ApiError::from_auth_error_with_id(e, request_id.clone()))?;

    match status {
        ResetStatus::Reset => Ok(Json(MessageResponse {
            message: "Password has been reset".to_string(),
        })),
        ResetStatus::InvalidToken => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_token",
            "This password reset token is invalid",
        )
        .with_request_id(request_id)),
        ResetStatus::InvalidUser => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "invalid_user",
            "We can't find a user with that email address",
        )
        .with_request_id(request_id)),
        ResetStatus::Throttled => Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "throttled",
            "Too many attempts; request a new reset link",
        )
        .with_request_id(request_id)),
    }
}

/// Handler for email verification links
///
/// GET /v1/verify-email/{id}/{digest}
pub async fn verify_email_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((user_id, digest)): Path<(UserId, String)>,
) -> Result<Json<MessageResponse>, ApiError> {
    let request_id = request_id(&headers);
    let ctx = RequestContext::new(request_id.clone());

    let outcome = state
        .bus
        .dispatch(&ctx, VerifyEmail { user_id, digest })
        .await
        .map_err(|e| ApiError::from_auth_error_with_id(e, request_id.clone()))?;

    match outcome {
        VerifyEmailOutcome::Verified(_) => Ok(Json(MessageResponse {
            message: "Email verified".to_string(),
        })),
        VerifyEmailOutcome::AlreadyVerified => Ok(Json(MessageResponse {
            message: "Email already verified".to_string(),
        })),
        VerifyEmailOutcome::InvalidLink => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_link",
            "The verification link is invalid",
        )
        .with_request_id(request_id)),
    }
}

/// Handler for logout (guarded)
///
/// POST /v1/logout
///
/// The rotation guard has already resolved the caller; the command
/// carries a snapshot of the account and revokes the presented token.
pub async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(identity): Extension<CallerIdentity>,
) -> Result<Json<MessageResponse>, ApiError> {
    let request_id = request_id(&headers);

    let user = state
        .users
        .find_by_id(identity.user_id)
        .await
        .map_err(|e| ApiError::from_auth_error_with_id(e.into(), request_id.clone()))?
        .ok_or_else(|| {
            warn!(user_id = identity.user_id, "Authenticated account no longer exists");
            ApiError::from_auth_error_with_id(
                crate::core::errors::AuthError::AuthenticationRequired,
                request_id.clone(),
            )
        })?;

    let token_id = identity.token_id;
    let ctx = RequestContext::authenticated(request_id.clone(), identity);

    let outcome = state
        .bus
        .dispatch(&ctx, LogoutUser { user, token_id })
        .await
        .map_err(|e| ApiError::from_auth_error_with_id(e, request_id.clone()))?;

    match outcome {
        RevokeOutcome::Revoked => Ok(Json(MessageResponse {
            message: "Logged out".to_string(),
        })),
        RevokeOutcome::NoTokenBound => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "no_active_token",
            "No active access token found",
        )
        .with_request_id(request_id)),
    }
}

/// Handler for password changes (guarded)
///
/// POST /v1/update-password
pub async fn update_password_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(identity): Extension<CallerIdentity>,
    Json(body): Json<UpdatePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let request_id = request_id(&headers);
    let user_id = identity.user_id;
    let ctx = RequestContext::authenticated(request_id.clone(), identity);

    let outcome = state
        .bus
        .dispatch(
            &ctx,
            UpdatePassword {
                user_id,
                current_password: body.current_password,
                new_password: body.new_password,
            },
        )
        .await
        .map_err(|e| ApiError::from_auth_error_with_id(e, request_id.clone()))?;

    match outcome {
        UpdatePasswordOutcome::Updated => Ok(Json(MessageResponse {
            message: "Password updated".to_string(),
        })),
        UpdatePasswordOutcome::WrongCurrentPassword => Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "wrong_current_password",
            "Current password is incorrect",
        )
        .with_request_id(request_id)),
    }
}

/// Handler for the refresh endpoint (guarded)
///
/// POST /v1/refresh
///
/// The guard rotates expired credentials before any handler runs, so
/// this endpoint only reports: either the request's token was just
/// replaced (echo the replacement in the body as well as the header) or
/// it is still valid and there is nothing to hand out.
pub async fn refresh_handler(
    headers: HeaderMap,
    Extension(identity): Extension<CallerIdentity>,
    rotated: Option<Extension<RotatedBearer>>,
) -> Result<Json<TokenResponse>, ApiError> {
    let request_id = request_id(&headers);

    match rotated {
        Some(Extension(RotatedBearer(secret))) => {
            info!(user_id = identity.user_id, request_id = %request_id, "Token refresh served");
            Ok(Json(TokenResponse {
                message: "Access token refreshed".to_string(),
                access_token: secret.expose_secret().clone(),
            }))
        }
        None => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "token_still_valid",
            "Access token is still valid",
        )
        .with_request_id(request_id)),
    }
}

/// Health check handler
///
/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let database = match &state.db_pool {
        None => None,
        Some(pool) => {
            let status = match tokio::time::timeout(
                std::time::Duration::from_millis(500),
                sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool.as_ref()),
            )
            .await
            {
                Ok(Ok(_)) => "connected".to_string(),
                Ok(Err(e)) => {
                    warn!(error = %e, "Database ping failed");
                    format!("error: {}", e)
                }
                Err(_) => "timeout".to_string(),
            };
            Some(status)
        }
    };

    Ok(Json(HealthResponse { status: "healthy".to_string(), database }))
}
