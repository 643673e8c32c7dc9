// Bearer token storage - hashed at rest, plaintext surfaced exactly once

use crate::audit::masker::{AuditNode, Auditable};
use crate::core::errors::StoreError;
use crate::core::models::{TokenId, UserId};
use async_trait::async_trait;
use serde_json::json;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::fmt;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

/// Length of the random alphanumeric secret part
const SECRET_LEN: usize = 40;

/// Record name given to session credentials
pub const ACCESS_TOKEN_NAME: &str = "access_token";

/// Persisted form of an issued credential
///
/// The plaintext secret never lands here; only its hash does.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub id: TokenId,
    pub user_id: UserId,
    pub name: String,
    pub token_hash: String,
    pub abilities: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// Whether the expiry, if any, has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// A freshly issued credential
///
/// The only place the plaintext wire form exists server-side; Debug
/// output redacts it and the wrapped buffer is zeroed on drop.
pub struct IssuedToken {
    pub id: TokenId,
    secret: Secret<String>,
}

impl IssuedToken {
    fn new(id: TokenId, wire: String) -> Self {
        Self { id, secret: Secret::new(wire) }
    }

    /// The `<id>|<secret>` wire form, to be handed to the caller once
    pub fn reveal(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IssuedToken(id={}, secret=<REDACTED>)", self.id)
    }
}

impl Auditable for IssuedToken {
    fn audit_node(&self) -> AuditNode {
        AuditNode::declared(
            json!({
                "id": self.id,
                "access_token": self.reveal(),
            }),
            &["access_token"],
        )
    }
}

/// Hex sha256 of the secret part, the only persisted form
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}

/// Split the `<id>|<secret>` wire form
///
/// Anything malformed resolves to no token, never an error.
pub fn parse_bearer(bearer: &str) -> Option<(TokenId, &str)> {
    let (id, secret) = bearer.split_once('|')?;
    let id: TokenId = id.parse().ok()?;
    if secret.is_empty() {
        return None;
    }
    Some((id, secret))
}

fn hashes_match(stored: &str, candidate: &str) -> bool {
    stored.as_bytes().ct_eq(candidate.as_bytes()).into()
}

/// Store seam for bearer credentials
///
/// Expiry policy belongs to the rotation guard; lookups return expired
/// records as-is.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Create a token record and return its plaintext wire form exactly
    /// once. A supplied expiry is attached before the token becomes
    /// observable.
    async fn issue(
        &self,
        user_id: UserId,
        name: &str,
        abilities: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedToken, StoreError>;

    /// Delete the identified token; `false` when nothing was bound
    async fn revoke(&self, token_id: TokenId) -> Result<bool, StoreError>;

    /// Resolve a `<id>|<secret>` wire form to its record
    async fn find_by_secret(&self, bearer: &str) -> Result<Option<TokenRecord>, StoreError>;

    /// Fetch a record by id
    async fn find_by_id(&self, token_id: TokenId) -> Result<Option<TokenRecord>, StoreError>;

    /// Atomically replace `old_token_id` with a fresh credential
    ///
    /// Returns `None` when the old record no longer exists (a concurrent
    /// rotation won the race). On error the old record is untouched.
    async fn rotate(
        &self,
        user_id: UserId,
        old_token_id: TokenId,
        name: &str,
        abilities: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<IssuedToken>, StoreError>;

    /// Stamp the token's last use
    async fn touch(&self, token_id: TokenId) -> Result<(), StoreError>;

    /// Number of live tokens held by a user
    async fn count_for_user(&self, user_id: UserId) -> Result<usize, StoreError>;
}

#[derive(Default)]
struct MemoryTokens {
    next_id: TokenId,
    records: HashMap<TokenId, TokenRecord>,
}

/// In-memory token store for tests and database-less deployments
pub struct MemoryTokenStore {
    inner: RwLock<MemoryTokens>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self { inner: RwLock::new(MemoryTokens { next_id: 1, records: HashMap::new() }) }
    }

    fn build_record(
        id: TokenId,
        user_id: UserId,
        name: &str,
        abilities: &[String],
        expires_at: Option<DateTime<Utc>>,
        secret: &str,
    ) -> TokenRecord {
        TokenRecord {
            id,
            user_id,
            name: name.to_string(),
            token_hash: hash_secret(secret),
            abilities: abilities.to_vec(),
            created_at: Utc::now(),
            expires_at,
            last_used_at: None,
        }
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn issue(
        &self,
        user_id: UserId,
        name: &str,
        abilities: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedToken, StoreError> {
        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id += 1;

        let secret = generate_secret();
        let record = Self::build_record(id, user_id, name, abilities, expires_at, &secret);
        inner.records.insert(id, record);

        Ok(IssuedToken::new(id, format!("{}|{}", id, secret)))
    }

    async fn revoke(&self, token_id: TokenId) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.records.remove(&token_id).is_some())
    }

    async fn find_by_secret(&self, bearer: &str) -> Result<Option<TokenRecord>, StoreError> {
        let Some((id, secret)) = parse_bearer(bearer) else {
            return Ok(None);
        };

        let inner = self.inner.read().await;
        let record = match inner.records.get(&id) {
            Some(record) if hashes_match(&record.token_hash, &hash_secret(secret)) => {
                Some(record.clone())
            }
            _ => None,
        };
        Ok(record)
    }

    async fn find_by_id(&self, token_id: TokenId) -> Result<Option<TokenRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.records.get(&token_id).cloned())
    }

    async fn rotate(
        &self,
        user_id: UserId,
        old_token_id: TokenId,
        name: &str,
        abilities: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<IssuedToken>, StoreError> {
        // One lock section covers the whole swap; the replacement is
        // inserted before the old record is removed so no reader ever
        // observes the user tokenless.
        let mut inner = self.inner.write().await;

        if !inner.records.contains_key(&old_token_id) {
            return Ok(None);
        }

        let id = inner.next_id;
        inner.next_id += 1;

        let secret = generate_secret();
        let record = Self::build_record(id, user_id, name, abilities, expires_at, &secret);
        inner.records.insert(id, record);
        inner.records.remove(&old_token_id);

        Ok(Some(IssuedToken::new(id, format!("{}|{}", id, secret))))
    }

    async fn touch(&self, token_id: TokenId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.records.get_mut(&token_id) {
            record.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn count_for_user(&self, user_id: UserId) -> Result<usize, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.records.values().filter(|r| r.user_id == user_id).count())
    }
}

/// Database row structure for token lookup
#[derive(FromRow)]
struct TokenRow {
    id: i64,
    user_id: i64,
    name: String,
    token_hash: String,
    abilities: Vec<String>,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
}

impl From<TokenRow> for TokenRecord {
    fn from(row: TokenRow) -> Self {
        TokenRecord {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            token_hash: row.token_hash,
            abilities: row.abilities,
            created_at: row.created_at,
            expires_at: row.expires_at,
            last_used_at: row.last_used_at,
        }
    }
}

/// Database-backed token store
pub struct DbTokenStore {
    db_pool: PgPool,
}

impl DbTokenStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl TokenStore for DbTokenStore {
    async fn issue(
        &self,
        user_id: UserId,
        name: &str,
        abilities: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedToken, StoreError> {
        let secret = generate_secret();

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO personal_access_tokens
                 (user_id, name, token_hash, abilities, created_at, expires_at)
             VALUES ($1, $2, $3, $4, NOW(), $5)
             RETURNING id",
        )
        .bind(user_id)
        .bind(name)
        .bind(hash_secret(&secret))
        .bind(abilities)
        .bind(expires_at)
        .fetch_one(&self.db_pool)
        .await
        .map_err(StoreError::from_database)?;

        Ok(IssuedToken::new(id, format!("{}|{}", id, secret)))
    }

    async fn revoke(&self, token_id: TokenId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM personal_access_tokens WHERE id = $1")
            .bind(token_id)
            .execute(&self.db_pool)
            .await
            .map_err(StoreError::from_database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_secret(&self, bearer: &str) -> Result<Option<TokenRecord>, StoreError> {
        let Some((id, secret)) = parse_bearer(bearer) else {
            return Ok(None);
        };

        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT id, user_id, name, token_hash, abilities, created_at, expires_at, last_used_at
             FROM personal_access_tokens
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(StoreError::from_database)?;

        Ok(row
            .filter(|r| hashes_match(&r.token_hash, &hash_secret(secret)))
            .map(TokenRecord::from))
    }

    async fn find_by_id(&self, token_id: TokenId) -> Result<Option<TokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT id, user_id, name, token_hash, abilities, created_at, expires_at, last_used_at
             FROM personal_access_tokens
             WHERE id = $1",
        )
        .bind(token_id)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(StoreError::from_database)?;

        Ok(row.map(TokenRecord::from))
    }

    async fn rotate(
        &self,
        user_id: UserId,
        old_token_id: TokenId,
        name: &str,
        abilities: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<IssuedToken>, StoreError> {
        // Delete and insert share one transaction; a failed insert rolls
        // the delete back, leaving the expired record for a retry.
        let mut tx = self.db_pool.begin().await.map_err(StoreError::from_database)?;

        let deleted = sqlx::query(
            "DELETE FROM personal_access_tokens WHERE id = $1 AND user_id = $2",
        )
        .bind(old_token_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_database)?;

        if deleted.rows_affected() == 0 {
            tx.rollback().await.map_err(StoreError::from_database)?;
            return Ok(None);
        }

        let secret = generate_secret();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO personal_access_tokens
                 (user_id, name, token_hash, abilities, created_at, expires_at)
             VALUES ($1, $2, $3, $4, NOW(), $5)
             RETURNING id",
        )
        .bind(user_id)
        .bind(name)
        .bind(hash_secret(&secret))
        .bind(abilities)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from_database)?;

        tx.commit().await.map_err(StoreError::from_database)?;

        Ok(Some(IssuedToken::new(id, format!("{}|{}", id, secret))))
    }

    async fn touch(&self, token_id: TokenId) -> Result<(), StoreError> {
        sqlx::query("UPDATE personal_access_tokens SET last_used_at = NOW() WHERE id = $1")
            .bind(token_id)
            .execute(&self.db_pool)
            .await
            .map_err(StoreError::from_database)?;
        Ok(())
    }

    async fn count_for_user(&self, user_id: UserId) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM personal_access_tokens WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.db_pool)
        .await
        .map_err(StoreError::from_database)?;

        Ok(count as usize)
    }
}
