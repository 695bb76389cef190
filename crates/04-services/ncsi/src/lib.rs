//! NC-SI dialect (message type 0x02).
//!
//! Requests carry an instance id from the transport instance's 256-entry
//! pool; responses are matched on that id and the command with its
//! response bit cleared. The platform never answers NC-SI requests itself.

mod dialect;
mod header;

pub use dialect::{NcsiConfig, NcsiDialect, NcsiKey};
pub use header::{NcsiHeader, NcsiResponse, HEADER_LEN, HEADER_REVISION, MAX_PAYLOAD, MC_ID};
