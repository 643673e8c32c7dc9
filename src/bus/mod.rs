// Command bus - typed dispatch through an ordered middleware chain

pub mod command;
pub mod middleware;

use crate::audit::masker::Auditable;
use crate::core::errors::{AuthError, StoreError};
use crate::core::models::RequestContext;
use command::{Command, CommandInfo, ErasedHandler, Handler, Registration};
use middleware::{Middleware, Next, Terminal};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Routes typed commands to their registered handlers through the
/// middleware chain
///
/// The handler registry and chain order are fixed at construction and
/// identical for every command; both are read-only afterwards and safe
/// for unsynchronized concurrent dispatch. Known infrastructure failures
/// are translated into domain errors on the way out.
pub struct CommandBus {
    handlers: HashMap<TypeId, Arc<dyn ErasedHandler>>,
    chain: Vec<Arc<dyn Middleware>>,
}

impl CommandBus {
    pub fn builder() -> CommandBusBuilder {
        CommandBusBuilder::default()
    }

    /// Dispatch a command to its handler
    ///
    /// Fails with `HandlerNotFound` when the command type was never
    /// registered. The middleware chain wraps the handler invocation and
    /// the handler's return value propagates back verbatim.
    pub async fn dispatch<C: Command>(
        &self,
        ctx: &RequestContext,
        command: C,
    ) -> Result<C::Output, AuthError> {
        let handler = self
            .handlers
            .get(&TypeId::of::<C>())
            .cloned()
            .ok_or(AuthError::HandlerNotFound { command: C::NAME })?;

        let info = CommandInfo {
            name: C::NAME,
            request_id: ctx.request_id.clone(),
            audit: command.audit_node(),
        };

        let boxed: Box<dyn Any + Send> = Box::new(command);
        let terminal: Terminal<'_> = Box::pin(async move { handler.call(ctx, boxed).await });

        let outcome = Next::new(&self.chain, terminal)
            .run(&info)
            .await
            .map_err(translate)?;

        let output = outcome
            .value
            .downcast::<C::Output>()
            .map_err(|_| AuthError::HandlerNotFound { command: C::NAME })?;

        Ok(*output)
    }
}

/// Translate recognized infrastructure failure shapes into domain errors
///
/// Only the uniqueness-violation shape is translated; everything else
/// passes through unmodified to preserve diagnostic fidelity.
fn translate(err: AuthError) -> AuthError {
    match err {
        AuthError::Store(source @ StoreError::UniqueViolation { .. }) => {
            AuthError::DuplicateEntry { source }
        }
        other => other,
    }
}

/// Builds the bus: middleware order first, then one handler per command
/// type
#[derive(Default)]
pub struct CommandBusBuilder {
    handlers: HashMap<TypeId, Arc<dyn ErasedHandler>>,
    chain: Vec<Arc<dyn Middleware>>,
}

impl CommandBusBuilder {
    /// Append a middleware; call order is invocation order
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.chain.push(middleware);
        self
    }

    /// Register the handler for a command type, replacing any previous
    /// registration for that type
    pub fn register<C, H>(mut self, handler: Arc<H>) -> Self
    where
        C: Command,
        H: Handler<C> + 'static,
    {
        self.handlers
            .insert(TypeId::of::<C>(), Arc::new(Registration::<C, H>::new(handler)));
        self
    }

    pub fn build(self) -> CommandBus {
        CommandBus { handlers: self.handlers, chain: self.chain }
    }
}
