use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;

use transport::TransportResult;
use transport_fabric::{InstanceHandle, MsgParams, RxParams};

use crate::error::DispatchError;

/// Result of a command handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Send this body (completion code first) after the response header.
    Reply(Vec<u8>),
    /// No automatic response; the handler answers later through
    /// [`Request::defer`] or not at all.
    Later,
}

/// Response header bytes; every dialect header fits inline.
pub type ReplyHeader = SmallVec<[u8; 16]>;

/// An inbound request as seen by a command handler.
pub struct Request<'a> {
    pub instance: &'a InstanceHandle,
    pub params: RxParams,
    /// Dialect-specific request id (instance id or message tag).
    pub inst_id: u8,
    pub cmd: u8,
    /// Payload after the dialect header.
    pub body: &'a [u8],
    reply_header: ReplyHeader,
}

impl<'a> Request<'a> {
    pub fn new(
        instance: &'a InstanceHandle,
        params: RxParams,
        inst_id: u8,
        cmd: u8,
        body: &'a [u8],
        reply_header: ReplyHeader,
    ) -> Self {
        Self {
            instance,
            params,
            inst_id,
            cmd,
            body,
            reply_header,
        }
    }

    pub fn reply_header(&self) -> &[u8] {
        &self.reply_header
    }

    /// Full response message for `body`.
    pub fn response(&self, body: &[u8]) -> Vec<u8> {
        let mut msg = Vec::with_capacity(self.reply_header.len() + body.len());
        msg.extend_from_slice(&self.reply_header);
        msg.extend_from_slice(body);
        msg
    }

    /// Captures what is needed to answer after the handler returns.
    pub fn defer(&self) -> DeferredReply {
        DeferredReply {
            instance: self.instance.clone(),
            params: self.params.reply(),
            header: self.reply_header.clone(),
        }
    }
}

/// A response owed to a peer, sendable from any thread.
pub struct DeferredReply {
    instance: InstanceHandle,
    params: MsgParams,
    header: ReplyHeader,
}

impl DeferredReply {
    pub fn send(self, body: &[u8]) -> TransportResult<()> {
        let mut msg = Vec::with_capacity(self.header.len() + body.len());
        msg.extend_from_slice(&self.header);
        msg.extend_from_slice(body);
        self.instance.send(&msg, self.params)
    }
}

pub trait CommandHandler: Send + Sync {
    fn handle(&self, request: &Request<'_>) -> Result<HandlerOutcome, DispatchError>;
}

impl<F> CommandHandler for F
where
    F: Fn(&Request<'_>) -> Result<HandlerOutcome, DispatchError> + Send + Sync,
{
    fn handle(&self, request: &Request<'_>) -> Result<HandlerOutcome, DispatchError> {
        self(request)
    }
}

/// Handlers indexed by command code.
#[derive(Default)]
pub struct CommandTable {
    handlers: RwLock<BTreeMap<u8, Arc<dyn CommandHandler>>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` for `cmd`, returning the one it replaces.
    pub fn register(
        &self,
        cmd: u8,
        handler: Arc<dyn CommandHandler>,
    ) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.write().insert(cmd, handler)
    }

    pub fn get(&self, cmd: u8) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.read().get(&cmd).cloned()
    }

    /// Registered command codes in ascending order.
    pub fn commands(&self) -> Vec<u8> {
        self.handlers.read().keys().copied().collect()
    }

    /// Looks up and runs the handler for `request.cmd`.
    pub fn dispatch(&self, request: &Request<'_>) -> Result<HandlerOutcome, DispatchError> {
        let handler = self
            .get(request.cmd)
            .ok_or(DispatchError::UnknownCommand(request.cmd))?;
        handler.handle(request)
    }
}
