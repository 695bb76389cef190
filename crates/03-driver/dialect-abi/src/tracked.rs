use correlation::{Attempt, CorrelationEngine, Registration, RegistrationHandle};
use std::fmt::Debug;
use transport::TransportError;
use transport_fabric::{InstanceHandle, MsgParams};

use crate::error::{DialectError, DialectResult};

/// Registers `registration`, then sends `payload`. The registration comes
/// first so a fast response cannot beat it; a failed send cancels it again.
pub fn send_tracked<K, R>(
    engine: &CorrelationEngine<K, R>,
    registration: Registration<K, R>,
    instance: &InstanceHandle,
    payload: &[u8],
    params: MsgParams,
) -> DialectResult<RegistrationHandle<K, R>>
where
    K: Eq + Debug + Send + 'static,
    R: Send + 'static,
{
    let handle = engine.register(registration)?;
    if let Err(err) = instance.send(payload, params) {
        handle.cancel();
        return Err(err.into());
    }
    Ok(handle)
}

/// Adapts a send result for [`correlation::read_with_retry`]. A request
/// that cannot be framed fails the same way on every attempt and ends the
/// read; any other send failure is retried.
pub fn attempt<K, R>(sent: DialectResult<RegistrationHandle<K, R>>) -> Attempt<K, R, DialectError> {
    match sent {
        Ok(handle) => Attempt::Sent(handle),
        Err(err @ DialectError::Malformed(_))
        | Err(err @ DialectError::Transport(TransportError::Framing(_))) => Attempt::Fatal(err),
        Err(err) => Attempt::Failed(err),
    }
}
