// Audit event recording - structured logs plus optional database persistence

use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

/// A single audit record
///
/// `payload` must already have passed through the masker; sinks treat it
/// as opaque.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub label: String,
    pub payload: Value,
    pub request_id: Option<String>,
}

impl AuditEvent {
    pub fn new(label: impl Into<String>, payload: Value) -> Self {
        Self { label: label.into(), payload, request_id: None }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Sink accepting (event label, masked payload) records
///
/// Implementations must not block the request path.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Default sink: structured logging under `target: "audit"`, with
/// optional database persistence
pub struct AuditLogger {
    db_pool: Option<Arc<PgPool>>,
}

impl AuditLogger {
    /// Create a new audit logger
    ///
    /// If `db_pool` is `None`, only structured logging is used (no
    /// database persistence).
    pub fn new(db_pool: Option<Arc<PgPool>>) -> Self {
        Self { db_pool }
    }
}

impl AuditSink for AuditLogger {
    /// Record an audit event
    ///
    /// Fire-and-forget: spawns an async task and doesn't block the
    /// request. Errors are logged but don't affect the request flow.
    fn record(&self, event: AuditEvent) {
        let db_pool = self.db_pool.clone();

        tokio::spawn(async move {
            info!(
                target: "audit",
                label = %event.label,
                request_id = ?event.request_id,
                payload = %event.payload,
                "Audit event"
            );

            if let Some(pool) = db_pool {
                let payload_str = event.payload.to_string();

                if let Err(e) = sqlx::query(
                    "INSERT INTO audit_events (label, payload, request_id, created_at)
                     VALUES ($1, $2::jsonb, $3, NOW())",
                )
                .bind(&event.label)
                .bind(&payload_str)
                .bind(&event.request_id)
                .execute(pool.as_ref())
                .await
                {
                    warn!(error = %e, "Failed to write audit event to database");
                }
            }
        });
    }
}
