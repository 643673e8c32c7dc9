// Rotation guard behavior: pass-through, replacement, and failure paths

use authgate::core::errors::AuthError;
use authgate::core::models::Role;
use authgate::token::rotation::RotationDecision;
use authgate::token::store::{TokenStore, ACCESS_TOKEN_NAME};
use chrono::{Duration, Utc};
use secrecy::ExposeSecret;
use std::sync::Arc;

use crate::common::*;

#[tokio::test]
async fn test_live_token_passes_through_untouched() {
    let app = test_app();
    let user = seed_user(&app, "Dana", "dana@example.com", "hunter2hunter2", Role::User).await;
    let issued = app
        .tokens
        .issue(
            user.id,
            ACCESS_TOKEN_NAME,
            &["view_orders".to_string()],
            Some(Utc::now() + Duration::hours(1)),
        )
        .await
        .unwrap();

    let decision = app.guard.authorize(Some(issued.reveal()), "req-1").await.unwrap();

    match decision {
        RotationDecision::PassThrough(identity) => {
            assert_eq!(identity.user_id, user.id);
            assert_eq!(identity.token_id, issued.id);
            assert_eq!(identity.abilities, vec!["view_orders".to_string()]);
        }
        other => panic!("Expected pass-through, got {:?}", other),
    }

    let record = app.tokens.find_by_id(issued.id).await.unwrap().unwrap();
    assert!(record.last_used_at.is_some());
    assert_eq!(app.tokens.count_for_user(user.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_expired_token_is_replaced_atomically() {
    let app = test_app();
    let user = seed_user(&app, "Ada", "ada@example.com", "hunter2hunter2", Role::Admin).await;
    let expired = issue_expired_token(&app, user.id, &["refresh"]).await;

    let before = Utc::now();
    let decision = app.guard.authorize(Some(expired.reveal()), "req-2").await.unwrap();

    let RotationDecision::Replaced { identity, new_token } = decision else {
        panic!("Expected a replacement for an expired token");
    };

    // Abilities come from the owner's current role, not the old record
    let ability_names: Vec<&str> = identity.abilities.iter().map(String::as_str).collect();
    assert_eq!(
        ability_names,
        vec!["view_users", "create_users", "edit_users", "delete_users"]
    );

    let wire = new_token.expose_secret();
    assert_ne!(wire.as_str(), expired.reveal());

    // The old credential is dead
    assert!(app.tokens.find_by_secret(expired.reveal()).await.unwrap().is_none());
    assert!(app.tokens.find_by_id(expired.id).await.unwrap().is_none());

    // The replacement is live with a fresh expiry near now + TTL
    let record = app.tokens.find_by_secret(wire).await.unwrap().unwrap();
    assert_eq!(record.id, identity.token_id);
    let expires_at = record.expires_at.unwrap();
    assert!((expires_at - (before + Duration::hours(1))).num_seconds().abs() <= 5);

    assert_eq!(app.tokens.count_for_user(user.id).await.unwrap(), 1);
    assert!(app.sink.labels().iter().any(|l| l == "token.rotated"));
}

#[tokio::test]
async fn test_unknown_and_malformed_bearers_are_rejected() {
    let app = test_app();

    let bearers = [
        None,
        Some("garbage"),
        Some("12|"),
        Some("|secretsecretsecretsecretsecretsecretsecr"),
        Some("9999|aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
    ];
    for bearer in bearers {
        let err = app.guard.authorize(bearer, "req-3").await.unwrap_err();
        assert!(
            matches!(err, AuthError::AuthenticationRequired),
            "bearer {:?} should not authenticate",
            bearer
        );
    }
}

#[tokio::test]
async fn test_rotation_failure_leaves_the_expired_record_in_place() {
    let app = test_app_with(Arc::new(FailingPermissionSource), Duration::hours(1));
    let user = seed_user(&app, "Faye", "faye@example.com", "hunter2hunter2", Role::User).await;
    let expired = issue_expired_token(&app, user.id, &["refresh"]).await;

    let err = app.guard.authorize(Some(expired.reveal()), "req-4").await.unwrap_err();

    assert!(matches!(err, AuthError::RotationFailed(_)));
    assert_eq!(err.status_code(), 500);

    // The expired record survives so a later request can retry
    let record = app.tokens.find_by_id(expired.id).await.unwrap().unwrap();
    assert!(record.is_expired(Utc::now()));
    assert_eq!(app.tokens.count_for_user(user.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_rotation_fails_when_the_owner_is_gone() {
    let app = test_app();
    // A token bound to an account that was never created
    let expired = issue_expired_token(&app, 404, &["refresh"]).await;

    let err = app.guard.authorize(Some(expired.reveal()), "req-5").await.unwrap_err();

    assert!(matches!(err, AuthError::RotationFailed(_)));
    assert!(app.tokens.find_by_id(expired.id).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rotation_has_exactly_one_winner() {
    let app = Arc::new(test_app());
    let user = seed_user(&app, "Race", "race@example.com", "hunter2hunter2", Role::User).await;
    let expired = issue_expired_token(&app, user.id, &["refresh"]).await;
    let bearer = expired.reveal().to_string();

    let mut handles = Vec::new();
    for i in 0..4 {
        let app = app.clone();
        let bearer = bearer.clone();
        handles.push(tokio::spawn(async move {
            app.guard.authorize(Some(bearer.as_str()), &format!("req-race-{}", i)).await
        }));
    }

    let mut replacements = 0;
    let mut lost_races = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(RotationDecision::Replaced { .. }) => replacements += 1,
            Err(AuthError::AuthenticationRequired) => lost_races += 1,
            other => panic!("Unexpected rotation outcome: {:?}", other),
        }
    }

    assert_eq!(replacements, 1);
    assert_eq!(lost_races, 3);
    assert_eq!(app.tokens.count_for_user(user.id).await.unwrap(), 1);
}
