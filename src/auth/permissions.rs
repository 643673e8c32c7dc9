// Role to ability mapping behind the permission seam

use async_trait::async_trait;

use crate::core::errors::StoreError;
use crate::core::models::{Role, User};

/// Source of the ability names a user's credentials carry
///
/// Looked up at login and again on every rotation, so a replacement
/// token always reflects the user's current grants.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    async fn abilities_for(&self, user: &User) -> Result<Vec<String>, StoreError>;
}

/// Fixed role map matching the seeded permission data
#[derive(Default)]
pub struct StaticPermissionSource;

impl StaticPermissionSource {
    fn names(role: Role) -> &'static [&'static str] {
        match role {
            Role::Admin => &["view_users", "create_users", "edit_users", "delete_users"],
            Role::Moderator => &["view_orders"],
            Role::User => &["view_orders"],
        }
    }
}

#[async_trait]
impl PermissionSource for StaticPermissionSource {
    async fn abilities_for(&self, user: &User) -> Result<Vec<String>, StoreError> {
        Ok(Self::names(user.role).iter().map(|s| s.to_string()).collect())
    }
}
