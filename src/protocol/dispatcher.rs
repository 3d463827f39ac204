use crate::error::{ProtocolError, Result};
use crate::protocol::message::{ConnectionId, IncomingMessage, OutgoingMessage};
use crate::transport::session_registry::Session;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// What a handler may see besides the packet itself.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    connection: ConnectionId,
    session: Arc<Session>,
}

impl HandlerContext {
    pub fn new(connection: ConnectionId, session: Arc<Session>) -> Self {
        Self {
            connection,
            session,
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Key material of the connection, e.g. to RSA-decrypt credentials.
    pub fn session(&self) -> &Session {
        &self.session
    }
}

/// Application logic for one opcode. Runs on the worker pool, never on an
/// I/O task. A returned message without a target goes back to the sender.
pub trait Handler: Send + Sync {
    fn handle(
        &self,
        ctx: &HandlerContext,
        msg: &mut IncomingMessage,
    ) -> Result<Option<OutgoingMessage>>;
}

impl<F> Handler for F
where
    F: Fn(&HandlerContext, &mut IncomingMessage) -> Result<Option<OutgoingMessage>>
        + Send
        + Sync,
{
    fn handle(
        &self,
        ctx: &HandlerContext,
        msg: &mut IncomingMessage,
    ) -> Result<Option<OutgoingMessage>> {
        self(ctx, msg)
    }
}

/// Pins a closure to the handler signature so its argument and return types
/// are inferred.
pub fn handler_fn<F>(f: F) -> F
where
    F: Fn(&HandlerContext, &mut IncomingMessage) -> Result<Option<OutgoingMessage>>
        + Send
        + Sync,
{
    f
}

/// Opcode to handler lookup.
pub trait HandlerResolver: Send + Sync {
    fn resolve(&self, opcode: u8) -> Result<Arc<dyn Handler>>;
}

/// Static opcode table. Filled with [`Dispatcher::register`] at startup and
/// shared read-only afterwards, so lookups take no lock.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<u8, Arc<dyn Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `opcode`, replacing any previous one.
    pub fn register<H>(&mut self, opcode: u8, handler: H) -> &mut Self
    where
        H: Handler + 'static,
    {
        if self.handlers.insert(opcode, Arc::new(handler)).is_some() {
            debug!(opcode, "Replaced handler");
        }
        self
    }

    pub fn opcodes(&self) -> impl Iterator<Item = u8> + '_ {
        self.handlers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl HandlerResolver for Dispatcher {
    fn resolve(&self, opcode: u8) -> Result<Arc<dyn Handler>> {
        self.handlers
            .get(&opcode)
            .cloned()
            .ok_or(ProtocolError::UnknownOpcode(opcode))
    }
}
