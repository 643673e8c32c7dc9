// Password-reset broker - throttled single-use tokens, hashed at rest

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::{ExposeSecret, Secret};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::info;

use crate::core::errors::StoreError;
use crate::core::models::User;
use crate::token::store::hash_secret;

/// Length of the plaintext reset token
const RESET_TOKEN_LEN: usize = 60;

/// Failed verification attempts tolerated before the open request locks
const MAX_VERIFY_ATTEMPTS: u32 = 5;

/// Result of requesting a reset token
pub enum MintOutcome {
    /// Plaintext token, surfaced exactly once for delivery
    Minted(Secret<String>),
    /// An open request younger than the throttle window already exists
    Throttled,
}

/// Result of checking a presented reset token
#[derive(Debug, PartialEq, Eq)]
pub enum ResetVerification {
    Valid,
    /// Absent, mismatched, or expired
    Invalid,
    /// Too many failed attempts against the open request
    Throttled,
}

/// Broker seam for the reset-token lifecycle
#[async_trait]
pub trait ResetBroker: Send + Sync {
    /// Mint a token for the address unless a recent request is open
    async fn mint(&self, email: &str) -> Result<MintOutcome, StoreError>;

    /// Check a plaintext token against the open request for the address
    async fn verify(&self, email: &str, token: &str) -> Result<ResetVerification, StoreError>;

    /// Drop the open request once a reset has succeeded
    async fn consume(&self, email: &str) -> Result<(), StoreError>;
}

struct ResetRequest {
    token_hash: String,
    created_at: DateTime<Utc>,
    failed_attempts: u32,
}

impl ResetRequest {
    fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.created_at + ttl <= now
    }

    fn is_recent(&self, throttle: Duration, now: DateTime<Utc>) -> bool {
        now < self.created_at + throttle
    }
}

/// In-memory broker keyed by email address
pub struct MemoryResetBroker {
    requests: RwLock<HashMap<String, ResetRequest>>,
    token_ttl: Duration,
    throttle: Duration,
}

impl MemoryResetBroker {
    pub fn new(token_ttl: Duration, throttle: Duration) -> Self {
        Self { requests: RwLock::new(HashMap::new()), token_ttl, throttle }
    }
}

fn generate_reset_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RESET_TOKEN_LEN)
        .map(char::from)
        .collect()
}

fn hashes_match(stored: &str, candidate: &str) -> bool {
    stored.as_bytes().ct_eq(candidate.as_bytes()).into()
}

#[async_trait]
impl ResetBroker for MemoryResetBroker {
    async fn mint(&self, email: &str) -> Result<MintOutcome, StoreError> {
        let mut requests = self.requests.write().await;
        let now = Utc::now();

        if let Some(open) = requests.get(email) {
            // Expired requests don't throttle a fresh mint.
            if open.is_recent(self.throttle, now) && !open.is_expired(self.token_ttl, now) {
                return Ok(MintOutcome::Throttled);
            }
        }

        let token = generate_reset_token();
        requests.insert(
            email.to_string(),
            ResetRequest {
                token_hash: hash_secret(&token),
                created_at: now,
                failed_attempts: 0,
            },
        );
        Ok(MintOutcome::Minted(Secret::new(token)))
    }

    async fn verify(&self, email: &str, token: &str) -> Result<ResetVerification, StoreError> {
        let mut requests = self.requests.write().await;
        let now = Utc::now();

        let Some(open) = requests.get_mut(email) else {
            return Ok(ResetVerification::Invalid);
        };

        if open.is_expired(self.token_ttl, now) {
            requests.remove(email);
            return Ok(ResetVerification::Invalid);
        }
        if open.failed_attempts >= MAX_VERIFY_ATTEMPTS {
            return Ok(ResetVerification::Throttled);
        }
        if !hashes_match(&open.token_hash, &hash_secret(token)) {
            open.failed_attempts += 1;
            return Ok(ResetVerification::Invalid);
        }

        Ok(ResetVerification::Valid)
    }

    async fn consume(&self, email: &str) -> Result<(), StoreError> {
        let mut requests = self.requests.write().await;
        requests.remove(email);
        Ok(())
    }
}

/// Delivery seam for reset links
///
/// Implementations must not block the request path.
pub trait ResetNotifier: Send + Sync {
    fn deliver(&self, user: &User, token: &str);
}

/// Development delivery channel: writes the full link, token included,
/// to the log the way a log mail driver would
pub struct LogResetNotifier;

impl ResetNotifier for LogResetNotifier {
    fn deliver(&self, user: &User, token: &str) {
        info!(
            email = %user.email,
            reset_link = %format!("/v1/reset-password?email={}&token={}", user.email, token),
            "Password reset link issued (log delivery)"
        );
    }
}
