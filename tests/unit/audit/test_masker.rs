// Masking behavior across nested snapshots and both dispatch sides

use authgate::audit::masker::{AuditMasker, AuditNode, Auditable, MaskCache, MASK};
use authgate::core::models::{Role, User};
use chrono::Utc;
use serde_json::json;

fn sample_user() -> User {
    User {
        id: 9,
        name: "Dana".to_string(),
        email: "dana@example.com".to_string(),
        password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
        role: Role::Moderator,
        remember_token: Some("remember1234567890".to_string()),
        email_verified_at: None,
        created_at: Utc::now(),
    }
}

#[test]
fn test_nested_account_snapshot_is_masked_by_its_own_declaration() {
    let masker = AuditMasker::new();
    let mut cache = MaskCache::new();

    let user = sample_user();
    let user_node = user.audit_node();
    let node = AuditNode::declared(
        json!({ "token_id": 4, "user": user_node.raw().clone() }),
        &[],
    )
    .with_child("user", user_node);

    let masked = masker.mask_command(&node, &mut cache);

    assert_eq!(masked["token_id"], 4);
    assert_eq!(masked["user"]["password_hash"], MASK);
    assert_eq!(masked["user"]["remember_token"], MASK);
    // The account declares email non-sensitive, and the empty parent set
    // leaves that choice standing
    assert_eq!(masked["user"]["email"], "dana@example.com");
    assert_eq!(masked["user"]["name"], "Dana");
}

#[test]
fn test_parent_set_sweeps_masked_children_too() {
    let masker = AuditMasker::new();
    let mut cache = MaskCache::new();

    let child = AuditNode::declared(json!({"secret": "child-own", "tag": "inner"}), &["secret"]);
    let node = AuditNode::declared(
        json!({"tag": "outer", "child": {"secret": "child-own", "tag": "inner"}}),
        &["tag"],
    )
    .with_child("child", child);

    let masked = masker.mask_command(&node, &mut cache);

    // The child's own set, then the parent's set over the whole tree
    assert_eq!(masked["child"]["secret"], MASK);
    assert_eq!(masked["child"]["tag"], MASK);
    assert_eq!(masked["tag"], MASK);
}

#[test]
fn test_bare_parent_default_set_reaches_into_children() {
    let masker = AuditMasker::new();
    let mut cache = MaskCache::new();

    let child = AuditNode::declared(json!({"email": "kept-by-child@example.com"}), &[]);
    let node = AuditNode::bare(json!({"child": {"email": "kept-by-child@example.com"}}))
        .with_child("child", child);

    let masked = masker.mask_command(&node, &mut cache);

    // The bare parent falls back to the default set, which still sweeps
    // the child's subtree after the child's own pass
    assert_eq!(masked["child"]["email"], MASK);
}

#[test]
fn test_empty_declaration_disables_the_default_set() {
    let masker = AuditMasker::new();
    let mut cache = MaskCache::new();

    let raw = json!({"email": "visible@example.com", "password": "also-visible"});
    let node = AuditNode::declared(raw.clone(), &[]);
    let masked = masker.mask_command(&node, &mut cache);

    assert_eq!(masked, raw);
}

#[test]
fn test_array_members_are_swept() {
    let masker = AuditMasker::new();
    let mut cache = MaskCache::new();

    let node = AuditNode::bare(json!({
        "accounts": [
            {"email": "a@example.com", "note": "first"},
            {"email": "b@example.com", "note": "second"}
        ]
    }));
    let masked = masker.mask_command(&node, &mut cache);

    assert_eq!(masked["accounts"][0]["email"], MASK);
    assert_eq!(masked["accounts"][1]["email"], MASK);
    assert_eq!(masked["accounts"][0]["note"], "first");
}

#[test]
fn test_result_side_redacts_token_shapes_at_depth() {
    let masker = AuditMasker::new();
    let mut cache = MaskCache::new();

    let wire = "31|aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    let node = AuditNode::declared(json!({"data": {"tokens": [wire, "not-a-token"]}}), &[]);
    let masked = masker.mask_result(&node, &mut cache);

    assert_eq!(masked["data"]["tokens"][0], MASK);
    assert_eq!(masked["data"]["tokens"][1], "not-a-token");
}

#[test]
fn test_command_side_leaves_token_shapes_alone() {
    let masker = AuditMasker::new();
    let mut cache = MaskCache::new();

    let wire = "31|aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    let node = AuditNode::declared(json!({"echo": wire}), &[]);
    let masked = masker.mask_command(&node, &mut cache);

    assert_eq!(masked["echo"], wire);
}

#[test]
fn test_cache_distinguishes_command_and_result_sides() {
    let masker = AuditMasker::new();
    let mut cache = MaskCache::new();

    let wire = "31|aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    let node = AuditNode::declared(json!({"echo": wire}), &[]);

    let command_view = masker.mask_command(&node, &mut cache);
    let result_view = masker.mask_result(&node, &mut cache);

    assert_ne!(command_view, result_view);
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_masking_is_deterministic_across_caches() {
    let masker = AuditMasker::new();

    let user = sample_user();
    let first = masker.mask_command(&user.audit_node(), &mut MaskCache::new());
    let second = masker.mask_command(&user.audit_node(), &mut MaskCache::new());

    assert_eq!(first, second);
}

#[test]
fn test_custom_fallback_set() {
    let masker = AuditMasker::with_default_fields(&["ssn"]);
    let mut cache = MaskCache::new();

    let node = AuditNode::bare(json!({"ssn": "000-00-0000", "email": "open@example.com"}));
    let masked = masker.mask_command(&node, &mut cache);

    assert_eq!(masked["ssn"], MASK);
    assert_eq!(masked["email"], "open@example.com");
}
