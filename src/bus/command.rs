// Typed commands and their handlers

use crate::audit::masker::{AuditNode, Auditable};
use crate::core::errors::AuthError;
use crate::core::models::RequestContext;
use async_trait::async_trait;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

/// A dispatchable request value
///
/// Identified by its concrete type, immutable, consumed exactly once by
/// dispatch. `NAME` is the stable label used in registry diagnostics and
/// audit events.
pub trait Command: Auditable + Send + 'static {
    type Output: Auditable + Send + 'static;

    const NAME: &'static str;
}

/// The single unit of logic fulfilling one command type
#[async_trait]
pub trait Handler<C: Command>: Send + Sync {
    async fn handle(&self, ctx: &RequestContext, command: C) -> Result<C::Output, AuthError>;
}

/// Type-erased handler output flowing back through the middleware chain
///
/// Carries the concrete output for the dispatch call site to downcast,
/// plus its audit snapshot for result logging.
pub struct Outcome {
    pub(crate) value: Box<dyn Any + Send>,
    pub(crate) audit: AuditNode,
}

impl Outcome {
    /// Build an outcome directly, for middleware that fulfils a command
    /// without reaching its handler
    pub fn new<T: Auditable + Send + 'static>(value: T) -> Self {
        Self { audit: value.audit_node(), value: Box::new(value) }
    }

    pub fn audit(&self) -> &AuditNode {
        &self.audit
    }
}

/// Inspectable view of the in-flight command handed to middleware
#[derive(Debug, Clone)]
pub struct CommandInfo {
    pub name: &'static str,
    pub request_id: String,
    pub audit: AuditNode,
}

/// Object-safe wrapper erasing the command type of a registration
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    async fn call(
        &self,
        ctx: &RequestContext,
        command: Box<dyn Any + Send>,
    ) -> Result<Outcome, AuthError>;
}

/// Pairs a concrete handler with its command type
pub(crate) struct Registration<C, H> {
    handler: Arc<H>,
    _command: PhantomData<fn(C)>,
}

impl<C, H> Registration<C, H> {
    pub(crate) fn new(handler: Arc<H>) -> Self {
        Self { handler, _command: PhantomData }
    }
}

#[async_trait]
impl<C, H> ErasedHandler for Registration<C, H>
where
    C: Command,
    H: Handler<C> + 'static,
{
    async fn call(
        &self,
        ctx: &RequestContext,
        command: Box<dyn Any + Send>,
    ) -> Result<Outcome, AuthError> {
        // The registry keys registrations by TypeId, so a failed downcast
        // can only mean a misconfigured registry.
        let command = command
            .downcast::<C>()
            .map_err(|_| AuthError::HandlerNotFound { command: C::NAME })?;

        let output = self.handler.handle(ctx, *command).await?;

        Ok(Outcome { audit: output.audit_node(), value: Box::new(output) })
    }
}
