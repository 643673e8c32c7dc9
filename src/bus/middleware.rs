// Ordered interceptor chain wrapping handler invocation

use crate::audit::logger::{AuditEvent, AuditSink};
use crate::audit::masker::{AuditMasker, MaskCache};
use crate::bus::command::{CommandInfo, Outcome};
use crate::core::errors::AuthError;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) type Terminal<'a> = BoxFuture<'a, Result<Outcome, AuthError>>;

/// A chain-of-responsibility unit wrapping handler invocation
///
/// Receives a view of the in-flight command and the continuation over
/// the rest of the chain. A middleware may inspect and log, await `next`
/// to continue, or return without awaiting it to short-circuit (the
/// unawaited continuation never reaches the handler). `next` is consumed
/// by value, so it cannot be invoked twice.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, command: &CommandInfo, next: Next<'_>) -> Result<Outcome, AuthError>;
}

/// Continuation over the remaining chain, terminating in the resolved
/// handler invocation
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    terminal: Terminal<'a>,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Middleware>], terminal: Terminal<'a>) -> Self {
        Self { chain, terminal }
    }

    /// Run the rest of the chain
    pub async fn run(self, command: &CommandInfo) -> Result<Outcome, AuthError> {
        match self.chain.split_first() {
            Some((head, rest)) => {
                head.handle(command, Next { chain: rest, terminal: self.terminal }).await
            }
            None => self.terminal.await,
        }
    }
}

/// Logs every dispatch in and out through the audit sink
///
/// Payloads pass through the masker before reaching the sink; the raw
/// command or result never does. The mask cache lives for one dispatch.
pub struct LoggingMiddleware {
    masker: AuditMasker,
    sink: Arc<dyn AuditSink>,
}

impl LoggingMiddleware {
    pub fn new(masker: AuditMasker, sink: Arc<dyn AuditSink>) -> Self {
        Self { masker, sink }
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(&self, command: &CommandInfo, next: Next<'_>) -> Result<Outcome, AuthError> {
        let mut cache = MaskCache::new();

        let masked = self.masker.mask_command(&command.audit, &mut cache);
        debug!(command = command.name, request_id = %command.request_id, "Dispatching command");
        self.sink.record(
            AuditEvent::new(format!("command.dispatching.{}", command.name), masked)
                .with_request_id(command.request_id.clone()),
        );

        let result = next.run(command).await;

        match &result {
            Ok(outcome) => {
                let masked = self.masker.mask_result(outcome.audit(), &mut cache);
                self.sink.record(
                    AuditEvent::new(format!("command.dispatched.{}", command.name), masked)
                        .with_request_id(command.request_id.clone()),
                );
            }
            Err(err) => {
                self.sink.record(
                    AuditEvent::new(
                        format!("command.failed.{}", command.name),
                        serde_json::json!({ "error": err.to_string() }),
                    )
                    .with_request_id(command.request_id.clone()),
                );
            }
        }

        result
    }
}
