// End-to-end flows over the HTTP surface

use authgate::audit::masker::is_token_shaped;
use authgate::auth::handlers::email_digest;
use authgate::auth::user_store::UserStore;
use authgate::core::models::Role;
use authgate::token::store::TokenStore;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::Duration;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

use crate::common::*;

async fn register(app: &TestApp, name: &str, email: &str, password: &str) -> String {
    let response = router_for(app)
        .oneshot(post_json(
            "/v1/register",
            json!({"name": name, "email": email, "password": password}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_register_issues_bearer_token() {
    let app = test_app();

    let response = router_for(&app)
        .oneshot(post_json(
            "/v1/register",
            json!({"name": "Dana", "email": "dana@example.com", "password": "hunter2hunter2"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Account created");
    assert!(is_token_shaped(body["access_token"].as_str().unwrap()));
}

#[tokio::test]
async fn test_duplicate_email_returns_validation_envelope() {
    let app = test_app();
    let payload = json!({"name": "Dana", "email": "dana@example.com", "password": "hunter2hunter2"});

    let first = router_for(&app).oneshot(post_json("/v1/register", payload.clone())).await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = router_for(&app).oneshot(post_json("/v1/register", payload)).await.unwrap();
    assert_eq!(second.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = body_json(second).await;
    assert_eq!(body["error"], "duplicate_entry");
    assert!(body["errors"]["email"][0].as_str().is_some());
}

#[tokio::test]
async fn test_register_validation_failures_name_the_field() {
    let app = test_app();
    let cases = [
        (json!({"name": "", "email": "a@b.co", "password": "long-enough-1"}), "name"),
        (json!({"name": "A", "email": "not-an-email", "password": "long-enough-1"}), "email"),
        (json!({"name": "A", "email": "a@b.co", "password": "short"}), "password"),
    ];

    for (payload, field) in cases {
        let response = router_for(&app).oneshot(post_json("/v1/register", payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY, "case {}", field);

        let body = body_json(response).await;
        assert_eq!(body["error"], "validation_failed");
        assert!(
            body["errors"][field][0].as_str().is_some(),
            "missing errors entry for {}",
            field
        );
    }
}

#[tokio::test]
async fn test_login_grants_and_rejects() {
    let app = test_app();
    seed_user(&app, "Dana", "dana@example.com", "hunter2hunter2", Role::User).await;

    let granted = router_for(&app)
        .oneshot(post_json(
            "/v1/login",
            json!({"email": "dana@example.com", "password": "hunter2hunter2"}),
        ))
        .await
        .unwrap();
    assert_eq!(granted.status(), StatusCode::OK);
    let body = body_json(granted).await;
    assert!(is_token_shaped(body["data"]["access_token"].as_str().unwrap()));

    let rejected = router_for(&app)
        .oneshot(post_json(
            "/v1/login",
            json!({"email": "dana@example.com", "password": "wrong-password"}),
        ))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(rejected).await["error"], "invalid_credentials");
}

#[tokio::test]
async fn test_guarded_routes_require_authentication() {
    let app = test_app();

    for uri in ["/v1/logout", "/v1/update-password", "/v1/refresh"] {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router_for(&app).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
    }
}

#[tokio::test]
async fn test_logout_revokes_the_presented_token() {
    let app = test_app();
    let token = register(&app, "Dana", "dana@example.com", "hunter2hunter2").await;

    let response = router_for(&app).oneshot(post_empty_authed("/v1/logout", &token)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message"], "Logged out");

    // The token no longer authenticates anything
    let reuse = router_for(&app).oneshot(post_empty_authed("/v1/logout", &token)).await.unwrap();
    assert_eq!(reuse.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_with_live_token_is_rejected() {
    let app = test_app();
    let token = register(&app, "Dana", "dana@example.com", "hunter2hunter2").await;

    let response = router_for(&app).oneshot(post_empty_authed("/v1/refresh", &token)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "token_still_valid");
}

#[tokio::test]
async fn test_expired_bearer_is_rotated_in_flight() {
    let app = test_app();
    let user = seed_user(&app, "Rolf", "rolf@example.com", "hunter2hunter2", Role::Moderator).await;
    let expired = issue_expired_token(&app, user.id, &["refresh"]).await;

    let response = router_for(&app)
        .oneshot(post_empty_authed("/v1/refresh", expired.reveal()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    // The replacement is echoed in the response Authorization header
    let echoed = response
        .headers()
        .get(header::AUTHORIZATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let new_bearer = echoed.strip_prefix("Bearer ").unwrap().to_string();
    assert_ne!(new_bearer, expired.reveal());
    assert!(is_token_shaped(&new_bearer));

    let body = body_json(response).await;
    assert_eq!(body["access_token"], new_bearer);

    // Old credential dead, replacement live
    let reuse = router_for(&app)
        .oneshot(post_empty_authed("/v1/refresh", expired.reveal()))
        .await
        .unwrap();
    assert_eq!(reuse.status(), StatusCode::UNAUTHORIZED);

    let fresh = router_for(&app)
        .oneshot(post_empty_authed("/v1/refresh", &new_bearer))
        .await
        .unwrap();
    assert_eq!(fresh.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rotation_failure_maps_to_server_error() {
    let app = test_app_with(Arc::new(FailingPermissionSource), Duration::hours(1));
    let user = seed_user(&app, "Faye", "faye@example.com", "hunter2hunter2", Role::User).await;
    let expired = issue_expired_token(&app, user.id, &["refresh"]).await;

    let response = router_for(&app)
        .oneshot(post_empty_authed("/v1/refresh", expired.reveal()))
        .await
        .unwrap();

    // Infrastructure failure is a 500, not a credential problem
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "rotation_failed");
    assert!(app.tokens.find_by_id(expired.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_verify_email_link_round_trip() {
    let app = test_app();
    let user = seed_user(&app, "Vera", "vera@example.com", "hunter2hunter2", Role::User).await;

    let bad = router_for(&app)
        .oneshot(get_request(&format!("/v1/verify-email/{}/notthedigest", user.id)))
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

    let uri = format!("/v1/verify-email/{}/{}", user.id, email_digest(&user.email));
    let verified = router_for(&app).oneshot(get_request(&uri)).await.unwrap();
    assert_eq!(verified.status(), StatusCode::OK);
    assert_eq!(body_json(verified).await["message"], "Email verified");

    let repeat = router_for(&app).oneshot(get_request(&uri)).await.unwrap();
    assert_eq!(repeat.status(), StatusCode::OK);
    assert_eq!(body_json(repeat).await["message"], "Email already verified");

    let stored = app.users.find_by_id(user.id).await.unwrap().unwrap();
    assert!(stored.is_verified());
}

#[tokio::test]
async fn test_password_reset_flow() {
    let app = test_app();
    seed_user(&app, "Rita", "rita@example.com", "old-password-1", Role::User).await;

    let unknown = router_for(&app)
        .oneshot(post_json("/v1/forgot-password", json!({"email": "nobody@example.com"})))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let sent = router_for(&app)
        .oneshot(post_json("/v1/forgot-password", json!({"email": "rita@example.com"})))
        .await
        .unwrap();
    assert_eq!(sent.status(), StatusCode::OK);

    let token = app.notifier.last_token_for("rita@example.com").unwrap();

    let reset = router_for(&app)
        .oneshot(post_json(
            "/v1/reset-password",
            json!({"email": "rita@example.com", "token": token.clone(), "password": "new-password-2"}),
        ))
        .await
        .unwrap();
    assert_eq!(reset.status(), StatusCode::OK);

    // Old password out, new password in
    let stale = router_for(&app)
        .oneshot(post_json(
            "/v1/login",
            json!({"email": "rita@example.com", "password": "old-password-1"}),
        ))
        .await
        .unwrap();
    assert_eq!(stale.status(), StatusCode::UNAUTHORIZED);

    let current = router_for(&app)
        .oneshot(post_json(
            "/v1/login",
            json!({"email": "rita@example.com", "password": "new-password-2"}),
        ))
        .await
        .unwrap();
    assert_eq!(current.status(), StatusCode::OK);

    // The link is single-use
    let reuse = router_for(&app)
        .oneshot(post_json(
            "/v1/reset-password",
            json!({"email": "rita@example.com", "token": token, "password": "third-password-3"}),
        ))
        .await
        .unwrap();
    assert_eq!(reuse.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_password_requires_the_current_one() {
    let app = test_app();
    let token = register(&app, "Dana", "dana@example.com", "hunter2hunter2").await;

    let wrong = router_for(&app)
        .oneshot(post_json_authed(
            "/v1/update-password",
            &token,
            json!({"current_password": "not-it-at-all", "new_password": "brand-new-pw-1"}),
        ))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(wrong).await["error"], "wrong_current_password");

    let changed = router_for(&app)
        .oneshot(post_json_authed(
            "/v1/update-password",
            &token,
            json!({"current_password": "hunter2hunter2", "new_password": "brand-new-pw-1"}),
        ))
        .await
        .unwrap();
    assert_eq!(changed.status(), StatusCode::OK);

    let login = router_for(&app)
        .oneshot(post_json(
            "/v1/login",
            json!({"email": "dana@example.com", "password": "brand-new-pw-1"}),
        ))
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_reports_without_database() {
    let app = test_app();

    let response = router_for(&app).oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body.get("database").is_none());
}
