//! Control dialect (message type 0x00).
//!
//! Answers Set Endpoint ID, Get Endpoint ID and Get Message Type Support
//! for the local platform, synthesises "unsupported command" for anything
//! else, and lets callers issue control requests to peers either with
//! callbacks ([`ControlDialect::send`]) or blocking
//! ([`ControlDialect::read`]).

mod dialect;
mod header;
mod responder;

pub use dialect::{ControlConfig, ControlDialect, ControlKey, EidAssignment, EndpointId};
pub use header::{cc, cmd, completion_code, ControlHeader, HEADER_LEN, INST_ID_MASK};
pub use responder::{EID_TYPE_STATIC, ENDPOINT_TYPE_BRIDGE};
