use smallvec::smallvec;

use dialect_abi::{DispatchError, ReplyHeader};
use transport::MsgType;

pub const HEADER_LEN: usize = 4;
pub const INST_ID_MASK: u8 = 0x1F;
const TYPE_MASK: u8 = 0x3F;

const FLAG_INTEGRITY: u8 = 0x80;
const FLAG_DATAGRAM: u8 = 0x40;
const FLAG_REQUEST: u8 = 0x80;

/// PLDM types.
pub mod pldm_type {
    pub const BASE: u8 = 0x00;
    pub const SMBIOS: u8 = 0x01;
    pub const PLATFORM: u8 = 0x02;
    pub const FW_UPDATE: u8 = 0x05;
    pub const OEM: u8 = 0x3F;
}

/// Completion codes.
pub mod cc {
    pub const SUCCESS: u8 = 0x00;
    pub const ERROR: u8 = 0x01;
    pub const INVALID_DATA: u8 = 0x02;
    pub const INVALID_LENGTH: u8 = 0x03;
    pub const NOT_READY: u8 = 0x04;
    pub const UNSUPPORTED_CMD: u8 = 0x05;
    pub const INVALID_PLDM_TYPE: u8 = 0x20;
}

pub fn completion_code(err: DispatchError) -> u8 {
    match err {
        DispatchError::UnknownCommand(_) => cc::UNSUPPORTED_CMD,
        DispatchError::InvalidLength => cc::INVALID_LENGTH,
        DispatchError::InvalidData => cc::INVALID_DATA,
        DispatchError::NotReady => cc::NOT_READY,
        DispatchError::Failed => cc::ERROR,
    }
}

/// `[type|IC] [inst_id:5 rsvd:1 D:1 Rq:1] [pldm_type:6 ver:2] [cmd]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PldmHeader {
    pub integrity_check: bool,
    pub inst_id: u8,
    pub datagram: bool,
    pub request: bool,
    pub pldm_type: u8,
    pub version: u8,
    pub cmd: u8,
}

impl PldmHeader {
    pub fn request(inst_id: u8, pldm_type: u8, cmd: u8) -> Self {
        Self {
            integrity_check: false,
            inst_id: inst_id & INST_ID_MASK,
            datagram: false,
            request: true,
            pldm_type: pldm_type & TYPE_MASK,
            version: 0,
            cmd,
        }
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let [ty, flags, kind, cmd, ..] = *bytes else {
            return None;
        };
        Some(Self {
            integrity_check: ty & FLAG_INTEGRITY != 0,
            inst_id: flags & INST_ID_MASK,
            datagram: flags & FLAG_DATAGRAM != 0,
            request: flags & FLAG_REQUEST != 0,
            pldm_type: kind & TYPE_MASK,
            version: kind >> 6,
            cmd,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut ty = MsgType::PLDM.as_byte();
        if self.integrity_check {
            ty |= FLAG_INTEGRITY;
        }
        let mut flags = self.inst_id & INST_ID_MASK;
        if self.datagram {
            flags |= FLAG_DATAGRAM;
        }
        if self.request {
            flags |= FLAG_REQUEST;
        }
        [
            ty,
            flags,
            (self.pldm_type & TYPE_MASK) | (self.version << 6),
            self.cmd,
        ]
    }

    pub fn reply(&self) -> ReplyHeader {
        let [ty, flags, kind, cmd] = Self {
            request: false,
            ..*self
        }
        .encode();
        smallvec![ty, flags, kind, cmd]
    }
}
