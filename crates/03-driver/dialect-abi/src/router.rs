use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::RwLock;
use smallvec::SmallVec;

use transport::MsgType;
use transport_fabric::{InstanceHandle, RxHandler, RxParams};

/// What a dialect did with one inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A request was answered.
    Responded,
    /// A request was accepted; the answer comes later, if at all.
    Deferred,
    /// A response completed a pending request.
    Matched,
    /// A response matched nothing pending and was dropped.
    Unmatched,
    /// The message was not acted upon.
    Dropped(&'static str),
    /// A response was due but could not be sent.
    SendFailed,
}

/// One message-type family layered on the transport.
pub trait Dialect: Send + Sync {
    fn msg_type(&self) -> MsgType;

    fn name(&self) -> &'static str;

    /// Handles a complete message whose first byte is this dialect's type.
    fn handle_inbound(
        &self,
        instance: &InstanceHandle,
        payload: &[u8],
        params: RxParams,
    ) -> Outcome;
}

/// Message types the platform answers for, shared with the control
/// dialect's type-support query.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    types: Arc<RwLock<SmallVec<[MsgType; 8]>>>,
}

impl TypeRegistry {
    pub fn insert(&self, ty: MsgType) {
        let mut types = self.types.write();
        if !types.contains(&ty) {
            types.push(ty);
            types.sort_by_key(|t| t.as_byte());
        }
    }

    pub fn supported(&self) -> SmallVec<[MsgType; 8]> {
        self.types.read().clone()
    }
}

/// Receive handler that hands each message to the dialect registered for
/// its type (integrity-check bit ignored).
#[derive(Default)]
pub struct MessageRouter {
    dialects: RwLock<SmallVec<[Arc<dyn Dialect>; 4]>>,
    types: TypeRegistry,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `dialect`, replacing any earlier one for the same type.
    pub fn register(&self, dialect: Arc<dyn Dialect>) {
        let ty = dialect.msg_type();
        let mut dialects = self.dialects.write();
        dialects.retain(|d| d.msg_type() != ty);
        debug!("dialect {} registered for type {:#04x}", dialect.name(), ty.as_byte());
        dialects.push(dialect);
        self.types.insert(ty);
    }

    pub fn types(&self) -> TypeRegistry {
        self.types.clone()
    }

    pub fn dialect(&self, ty: MsgType) -> Option<Arc<dyn Dialect>> {
        self.dialects
            .read()
            .iter()
            .find(|d| d.msg_type() == ty)
            .cloned()
    }

    pub fn route(&self, instance: &InstanceHandle, payload: &[u8], params: RxParams) -> Outcome {
        let Some(ty) = MsgType::from_payload(payload) else {
            return Outcome::Dropped("empty message");
        };
        let Some(dialect) = self.dialect(ty) else {
            warn!(
                "{}: no dialect for message type {:#04x} from {}",
                instance.name(),
                ty.as_byte(),
                params.src
            );
            return Outcome::Dropped("unsupported message type");
        };
        let outcome = dialect.handle_inbound(instance, payload, params);
        trace!(
            "{}: {} message from {} -> {:?}",
            instance.name(),
            dialect.name(),
            params.src,
            outcome
        );
        outcome
    }
}

impl RxHandler for MessageRouter {
    fn on_message(&self, instance: &InstanceHandle, payload: &[u8], params: RxParams) {
        self.route(instance, payload, params);
    }
}
