//! PLDM dialect (message type 0x01).
//!
//! Requests are dispatched through a per-type command table; the base type
//! answers Get TID, Get PLDM Types and Get PLDM Commands out of the box.
//! Outbound requests draw their instance id from the transport instance's
//! 32-entry pool and return it however the exchange ends.

mod dialect;
mod header;
mod types;


pub use dialect::{PldmConfig, PldmDialect, PldmKey};
pub use header::{cc, completion_code, pldm_type, PldmHeader, HEADER_LEN, INST_ID_MASK};
pub use types::{base_cmd, TypeTable, COMMAND_BITMAP_LEN, TYPE_BITMAP_LEN};
