// Account storage - in-memory (YAML-seedable) and database-backed stores

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::info;

use crate::core::errors::StoreError;
use crate::core::models::{NewUser, Role, User, UserId};

/// Store seam for registered accounts
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Create an account; a taken email surfaces as
    /// `StoreError::UniqueViolation`
    async fn create(&self, new_user: NewUser) -> Result<User, StoreError>;

    /// Persist changed fields of an existing account
    async fn update(&self, user: &User) -> Result<(), StoreError>;
}

/// Container for the users seed file root structure
#[derive(Debug, Deserialize)]
struct UsersYaml {
    users: Vec<UserSeedEntry>,
}

/// Seed entry; the hash is stored as-is, never derived at load time
#[derive(Debug, Deserialize)]
struct UserSeedEntry {
    name: String,
    email: String,
    password_hash: String,
    role: String,
    #[serde(default)]
    verified: bool,
}

#[derive(Default)]
struct MemoryUsers {
    next_id: UserId,
    records: HashMap<UserId, User>,
}

/// In-memory user store for tests and database-less deployments
pub struct MemoryUserStore {
    inner: RwLock<MemoryUsers>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self { inner: RwLock::new(MemoryUsers { next_id: 1, records: HashMap::new() }) }
    }

    /// Load seed users from a YAML file
    pub fn from_seed_file<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(StoreError::Unavailable(format!(
                "users seed file not found at {:?}",
                path_ref
            )));
        }

        let yaml_content = fs::read_to_string(path_ref).map_err(|e| {
            StoreError::Unavailable(format!("failed to read users seed file: {}", e))
        })?;

        let users_yaml: UsersYaml = serde_yaml::from_str(&yaml_content).map_err(|e| {
            StoreError::Unavailable(format!("failed to parse users seed YAML: {}", e))
        })?;

        let mut records = HashMap::new();
        let mut next_id: UserId = 1;
        for entry in users_yaml.users {
            let role = Role::from_name(&entry.role).ok_or_else(|| {
                StoreError::Unavailable(format!(
                    "unknown role '{}' for seed user '{}'",
                    entry.role, entry.email
                ))
            })?;
            if records.values().any(|u: &User| u.email == entry.email) {
                return Err(StoreError::Unavailable(format!(
                    "duplicate email '{}' in users seed file",
                    entry.email
                )));
            }

            let id = next_id;
            next_id += 1;
            records.insert(
                id,
                User {
                    id,
                    name: entry.name,
                    email: entry.email,
                    password_hash: entry.password_hash,
                    role,
                    remember_token: None,
                    email_verified_at: entry.verified.then(Utc::now),
                    created_at: Utc::now(),
                },
            );
        }

        info!(count = records.len(), "Loaded seed users");
        Ok(Self { inner: RwLock::new(MemoryUsers { next_id, records }) })
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.records.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.records.values().find(|u| u.email == email).cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;

        if inner.records.values().any(|u| u.email == new_user.email) {
            return Err(StoreError::UniqueViolation { field: "email".to_string() });
        }

        let id = inner.next_id;
        inner.next_id += 1;

        let user = User {
            id,
            name: new_user.name,
            email: new_user.email,
            password_hash: new_user.password_hash,
            role: new_user.role,
            remember_token: None,
            email_verified_at: None,
            created_at: Utc::now(),
        };
        inner.records.insert(id, user.clone());
        Ok(user)
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.records.get_mut(&user.id) {
            Some(slot) => {
                *slot = user.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }
}

/// Database row structure for user lookup
#[derive(FromRow)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    remember_token: Option<String>,
    email_verified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, StoreError> {
        let role = Role::from_name(&row.role).ok_or_else(|| {
            StoreError::Unavailable(format!("unknown role '{}' on user {}", row.role, row.id))
        })?;
        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role,
            remember_token: row.remember_token,
            email_verified_at: row.email_verified_at,
            created_at: row.created_at,
        })
    }
}

const USER_COLUMNS: &str =
    "id, name, email, password_hash, role, remember_token, email_verified_at, created_at";

/// Database-backed user store
pub struct DbUserStore {
    db_pool: PgPool,
}

impl DbUserStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UserStore for DbUserStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(StoreError::from_database)?;

        row.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(StoreError::from_database)?;

        row.map(User::try_from).transpose()
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (name, email, password_hash, role, created_at)
             VALUES ($1, $2, $3, $4, NOW())
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&new_user.name)
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(new_user.role.name())
        .fetch_one(&self.db_pool)
        .await
        .map_err(StoreError::from_database)?;

        User::try_from(row)
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE users
             SET name = $1, email = $2, password_hash = $3, role = $4,
                 remember_token = $5, email_verified_at = $6
             WHERE id = $7",
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.name())
        .bind(&user.remember_token)
        .bind(user.email_verified_at)
        .bind(user.id)
        .execute(&self.db_pool)
        .await
        .map_err(StoreError::from_database)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
