// Shared domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

use crate::audit::masker::{AuditNode, Auditable};

/// User identifier (BIGSERIAL in the database store)
pub type UserId = i64;

/// Token record identifier; also the public prefix of the bearer wire form
pub type TokenId = i64;

/// Assignable account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Moderator,
    User,
}

impl Role {
    /// Stable lowercase name used in storage and seed files
    pub fn name(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Moderator => "moderator",
            Role::User => "user",
        }
    }

    /// Parse the stable name back into a role
    pub fn from_name(name: &str) -> Option<Role> {
        match name {
            "admin" => Some(Role::Admin),
            "moderator" => Some(Role::Moderator),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

/// A registered account
///
/// `password_hash` and `remember_token` are secrets at rest; Debug output
/// redacts them and audit snapshots declare them sensitive.
#[derive(Clone)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub remember_token: Option<String>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether the account's email address has been verified
    pub fn is_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password_hash", &"<REDACTED>")
            .field("role", &self.role)
            .field("remember_token", &"<REDACTED>")
            .field("email_verified_at", &self.email_verified_at)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl Auditable for User {
    fn audit_node(&self) -> AuditNode {
        AuditNode::declared(
            json!({
                "id": self.id,
                "name": self.name,
                "email": self.email,
                "password_hash": self.password_hash,
                "remember_token": self.remember_token,
                "email_verified_at": self.email_verified_at,
                "created_at": self.created_at,
            }),
            &["password_hash", "remember_token"],
        )
    }
}

/// Fields required to create an account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Authenticated caller resolved at the request boundary
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub user_id: UserId,
    pub token_id: TokenId,
    pub abilities: Vec<String>,
}

/// Explicit per-request context handed into dispatch
///
/// Replaces any ambient current-user or current-request lookup; handlers
/// and middleware only ever see what the caller passed here.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub identity: Option<CallerIdentity>,
}

impl RequestContext {
    /// Context for an unauthenticated request
    pub fn new(request_id: impl Into<String>) -> Self {
        Self { request_id: request_id.into(), identity: None }
    }

    /// Context carrying a resolved caller identity
    pub fn authenticated(request_id: impl Into<String>, identity: CallerIdentity) -> Self {
        Self { request_id: request_id.into(), identity: Some(identity) }
    }
}
