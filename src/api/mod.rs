// Axum web server layer

use axum::{
    error_handling::HandleErrorLayer,
    http::StatusCode,
    routing::{get, post},
    BoxError, Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub mod handlers;
pub mod responses;

use crate::auth::user_store::UserStore;
use crate::bus::CommandBus;
use crate::config::Config;
use crate::token::rotation::{rotation_middleware, TokenRotationGuard};

/// Application state containing all shared dependencies
///
/// All components are wrapped in Arc for shared ownership across async
/// tasks. AppState itself is cloned per request by the router.
#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<CommandBus>,
    pub users: Arc<dyn UserStore>,
    pub guard: Arc<TokenRotationGuard>,
    pub db_pool: Option<Arc<PgPool>>,
    pub config: Arc<Config>,
}

/// Create the Axum router with all routes and middleware
///
/// Middleware stack (outermost to innermost):
/// - HTTP trace layer (tower-http::trace)
/// - Request timeout (tower::timeout behind HandleErrorLayer)
/// - Body size limit (tower-http::limit)
/// - Rotation guard (applied to protected routes only via route_layer)
///
/// `/health` and the credential endpoints bypass the guard.
pub fn create_router(app_state: &AppState) -> Router<AppState> {
    let guarded = Router::new()
        .route("/v1/logout", post(handlers::logout_handler))
        .route("/v1/update-password", post(handlers::update_password_handler))
        .route("/v1/refresh", post(handlers::refresh_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            app_state.guard.clone(),
            rotation_middleware,
        ));

    let mut router = Router::new()
        .route("/v1/register", post(handlers::register_handler))
        .route("/v1/login", post(handlers::login_handler))
        .route("/v1/forgot-password", post(handlers::forgot_password_handler))
        .route("/v1/reset-password", post(handlers::reset_password_handler))
        .route("/v1/verify-email/:id/:digest", get(handlers::verify_email_handler))
        .route("/health", get(handlers::health_handler))
        .merge(guarded);

    let body_limit = app_state.config.body_size_limit_bytes;
    let timeout_secs = app_state.config.request_timeout_secs;

    router = router.layer(RequestBodyLimitLayer::new(body_limit));

    // HandleErrorLayer must come BEFORE timeout to catch the timeout error
    let middleware_stack = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(|e: BoxError| async move {
            let status = if e.is::<tower::timeout::error::Elapsed>() {
                StatusCode::REQUEST_TIMEOUT
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, e.to_string())
        }))
        .timeout(Duration::from_secs(timeout_secs))
        .into_inner();

    router.layer(middleware_stack).layer(TraceLayer::new_for_http())
}
