//! Shared plumbing for the message dialects carried over the transport.
//!
//! A [`Dialect`] owns one message type. The [`MessageRouter`] is installed
//! as every transport instance's receive handler and fans messages out by
//! type. Responders implement [`CommandHandler`]s collected in a
//! [`CommandTable`]; requesters pair [`send_tracked`] with a correlation
//! engine.

mod error;
mod handler;
mod router;
mod tracked;

pub use error::{DialectError, DialectResult, DispatchError};
pub use handler::{
    CommandHandler, CommandTable, DeferredReply, HandlerOutcome, ReplyHeader, Request,
};
pub use router::{Dialect, MessageRouter, Outcome, TypeRegistry};
pub use tracked::{attempt, send_tracked};

/// Request-id state on the transport instance, re-exported for dialects.
pub use transport_fabric::{DialectIds, InstanceIdPool, TagCounter};
