//! Error handling helpers for the transport crate.
//!
//! Two small surfaces live here. [`TransportError`] covers medium I/O and
//! instance lifecycle failures, the things a sender learns about through its
//! completion signal. [`FramingError`] covers malformed or out-of-order
//! packets; those are logged by the inbound worker and never reach `send`.

use std::fmt;

/// Convenience result alias for fallible transport operations.
pub type TransportResult<T, E = TransportError> = Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Errors surfaced by media and transport instances.
pub enum TransportError {
    /// The medium rejected a read or write.
    MediumIo(String),
    /// No medium has been configured for the instance.
    NoMedium,
    /// The instance has not been started (or was stopped).
    NotRunning,
    /// `start` was called on an instance whose workers are already running.
    AlreadyRunning,
    /// The outbound queue is full; the caller owns the retry.
    QueueFull,
    /// The outbound worker went away before reporting completion.
    Closed,
    /// A worker thread could not be spawned.
    WorkerSpawn(String),
    /// Configuration was rejected.
    InvalidConfig(&'static str),
    /// The payload could not be framed.
    Framing(FramingError),
}

impl TransportError {
    pub fn medium(msg: impl Into<String>) -> Self {
        TransportError::MediumIo(msg.into())
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::MediumIo(reason) => write!(f, "medium i/o failed: {reason}"),
            TransportError::NoMedium => write!(f, "no medium configured"),
            TransportError::NotRunning => write!(f, "transport instance is not running"),
            TransportError::AlreadyRunning => write!(f, "transport instance is already running"),
            TransportError::QueueFull => write!(f, "outbound queue is full"),
            TransportError::Closed => write!(f, "outbound worker closed before completion"),
            TransportError::WorkerSpawn(reason) => {
                write!(f, "failed to spawn transport worker: {reason}")
            }
            TransportError::InvalidConfig(reason) => {
                write!(f, "invalid transport configuration: {reason}")
            }
            TransportError::Framing(err) => write!(f, "framing error: {err}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Framing(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FramingError> for TransportError {
    fn from(err: FramingError) -> Self {
        TransportError::Framing(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Packet-level anomalies detected while framing or deframing.
pub enum FramingError {
    /// Fewer bytes than a transport header.
    Truncated { len: usize },
    /// Messages must carry at least one byte (the message type).
    Empty,
    /// A middle or end packet arrived with no open reassembly slot.
    UnexpectedContinuation { tag: u8, tag_owner: bool },
    /// Message exceeds the assembly limit.
    Oversize { len: usize, limit: usize },
    /// Medium-level checksum mismatch.
    BadPec { expected: u8, actual: u8 },
    /// Medium-level command code was not the transport's.
    BadCommandCode(u8),
    /// Medium-level byte count disagrees with the received frame length.
    ByteCountMismatch { count: u8, len: usize },
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingError::Truncated { len } => {
                write!(f, "packet of {len} bytes is shorter than the transport header")
            }
            FramingError::Empty => write!(f, "message payload is empty"),
            FramingError::UnexpectedContinuation { tag, tag_owner } => write!(
                f,
                "continuation packet for tag {tag} (owner {}) without a start packet",
                u8::from(*tag_owner)
            ),
            FramingError::Oversize { len, limit } => {
                write!(f, "message of {len} bytes exceeds the {limit} byte limit")
            }
            FramingError::BadPec { expected, actual } => {
                write!(f, "pec mismatch: computed {expected:#04x}, received {actual:#04x}")
            }
            FramingError::BadCommandCode(code) => {
                write!(f, "unexpected medium command code {code:#04x}")
            }
            FramingError::ByteCountMismatch { count, len } => {
                write!(f, "byte count {count} does not fit a {len} byte frame")
            }
        }
    }
}

impl std::error::Error for FramingError {}
