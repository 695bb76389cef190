//! Blocking request/response on top of the callback engine.
//!
//! Each attempt registers a request whose callbacks feed a one-slot
//! rendezvous channel, then the caller parks on that channel for the
//! request timeout plus a margin. Anything short of an accepted response
//! counts as a failed attempt.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::engine::RegistrationHandle;
use crate::error::ReadError;

/// Attempts per read unless overridden.
pub const DEFAULT_READ_RETRIES: u32 = 3;
/// Extra wait on top of the request timeout before an attempt is abandoned.
pub const DEFAULT_READ_MARGIN: Duration = Duration::from_millis(1000);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadPolicy {
    pub retries: u32,
    /// Request timeout registered with the engine.
    pub timeout: Duration,
    pub margin: Duration,
}

impl ReadPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            retries: DEFAULT_READ_RETRIES,
            timeout,
            margin: DEFAULT_READ_MARGIN,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    /// How long one attempt waits for its outcome.
    pub fn wait(&self) -> Duration {
        self.timeout + self.margin
    }
}

#[derive(Debug)]
pub enum ReadEvent<T> {
    Response(T),
    Timeout,
    /// A response arrived but its status rules it out.
    Rejected,
}

/// Write end of one attempt's rendezvous. The first event wins; later ones
/// are discarded.
pub struct ReadSlot<T> {
    tx: Sender<ReadEvent<T>>,
}

impl<T> Clone for ReadSlot<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> ReadSlot<T> {
    pub fn respond(&self, value: T) {
        let _ = self.tx.try_send(ReadEvent::Response(value));
    }

    pub fn timed_out(&self) {
        let _ = self.tx.try_send(ReadEvent::Timeout);
    }

    pub fn reject(&self) {
        let _ = self.tx.try_send(ReadEvent::Rejected);
    }
}

/// Outcome of one attempt closure.
pub enum Attempt<K, R, E> {
    /// The request is registered and sent.
    Sent(RegistrationHandle<K, R>),
    /// The attempt failed before anything was pending; retry.
    Failed(E),
    /// Give up without retrying.
    Fatal(E),
}

/// Runs `attempt` up to `policy.retries` times until one delivers a
/// response through its [`ReadSlot`].
///
/// `attempt` must register its request so that the response callback calls
/// [`ReadSlot::respond`] (or [`ReadSlot::reject`]) and the timeout callback
/// calls [`ReadSlot::timed_out`]. An attempt whose wait expires is cancelled
/// before the next one starts.
pub fn read_with_retry<T, K, R, E, F>(policy: ReadPolicy, mut attempt: F) -> Result<T, ReadError<E>>
where
    E: std::fmt::Display,
    F: FnMut(ReadSlot<T>) -> Attempt<K, R, E>,
{
    for n in 1..=policy.retries {
        let (tx, rx): (Sender<ReadEvent<T>>, Receiver<ReadEvent<T>>) =
            crossbeam_channel::bounded(1);
        let handle = match attempt(ReadSlot { tx }) {
            Attempt::Sent(handle) => handle,
            Attempt::Failed(err) => {
                warn!(attempt = n, "read attempt failed to send: {err}");
                continue;
            }
            Attempt::Fatal(err) => return Err(ReadError::Fatal(err)),
        };
        match rx.recv_timeout(policy.wait()) {
            Ok(ReadEvent::Response(value)) => return Ok(value),
            Ok(ReadEvent::Timeout) => debug!(attempt = n, "read attempt timed out"),
            Ok(ReadEvent::Rejected) => debug!(attempt = n, "read attempt rejected"),
            Err(RecvTimeoutError::Timeout) => {
                handle.cancel();
                debug!(attempt = n, "read attempt abandoned");
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!(attempt = n, "read attempt dropped its callbacks");
            }
        }
    }
    warn!(attempts = policy.retries, "read retries exhausted");
    Err(ReadError::ReadTimeout {
        attempts: policy.retries,
    })
}
