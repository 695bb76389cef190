//! Request/response correlation for the transport dialects.
//!
//! * [`CorrelationEngine`] – pending requests keyed by a dialect-defined
//!   key, matched against inbound responses and expired by a sweeper.
//! * [`RegistrationHandle`] – idempotent cancellation of one entry.
//! * [`read_with_retry`] – a blocking read built from registrations and a
//!   one-slot rendezvous, retried a bounded number of times.

mod engine;
mod error;
mod read;
mod slab;

pub use engine::{CorrelationEngine, Registration, RegistrationHandle};
pub use error::{CorrelationError, CorrelationResult, ReadError};
pub use read::{
    read_with_retry, Attempt, ReadEvent, ReadPolicy, ReadSlot, DEFAULT_READ_MARGIN,
    DEFAULT_READ_RETRIES,
};
pub use slab::SlotKey;
