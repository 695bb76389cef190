//! CCI dialect (message type 0x08).
//!
//! Component command interface requests over the transport: an 8-bit
//! message tag from the instance's counter plus the opcode pair a response
//! with its request. A read succeeds only on a zero return code. The health
//! and firmware helpers wrap the opcodes the platform uses.

mod commands;
mod dialect;
mod header;

pub use commands::{
    op, transfer_request, ActivateAction, FirmwareInfo, HealthInfo, TransferAction, FW_INFO_LEN,
    FW_REVISION_LEN, FW_SLOTS, HEALTH_INFO_LEN, TRANSFER_CHUNK_LEN, TRANSFER_FW_LEN,
};
pub use dialect::{CciConfig, CciDialect, CciKey, CciResponse};
pub use header::{CciHeader, HEADER_LEN, MAX_PAYLOAD};
