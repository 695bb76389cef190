use smallvec::smallvec;

use dialect_abi::{DispatchError, ReplyHeader};
use transport::MsgType;

pub const HEADER_LEN: usize = 3;
/// Control instance ids are five bits wide.
pub const INST_ID_MASK: u8 = 0x1F;

const FLAG_DATAGRAM: u8 = 0x40;
const FLAG_REQUEST: u8 = 0x80;
const FLAG_INTEGRITY: u8 = 0x80;

/// Command codes.
pub mod cmd {
    pub const SET_ENDPOINT_ID: u8 = 0x01;
    pub const GET_ENDPOINT_ID: u8 = 0x02;
    pub const GET_MESSAGE_TYPE_SUPPORT: u8 = 0x05;
}

/// Completion codes.
pub mod cc {
    pub const SUCCESS: u8 = 0x00;
    pub const ERROR: u8 = 0x01;
    pub const INVALID_DATA: u8 = 0x02;
    pub const INVALID_LENGTH: u8 = 0x03;
    pub const NOT_READY: u8 = 0x04;
    pub const UNSUPPORTED_CMD: u8 = 0x05;
}

/// Maps a handler failure onto the completion code sent back.
pub fn completion_code(err: DispatchError) -> u8 {
    match err {
        DispatchError::UnknownCommand(_) => cc::UNSUPPORTED_CMD,
        DispatchError::InvalidLength => cc::INVALID_LENGTH,
        DispatchError::InvalidData => cc::INVALID_DATA,
        DispatchError::NotReady => cc::NOT_READY,
        DispatchError::Failed => cc::ERROR,
    }
}

/// `[type|IC] [inst_id:5 rsvd:1 D:1 Rq:1] [cmd]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlHeader {
    pub integrity_check: bool,
    pub inst_id: u8,
    pub datagram: bool,
    pub request: bool,
    pub cmd: u8,
}

impl ControlHeader {
    pub fn request(inst_id: u8, cmd: u8) -> Self {
        Self {
            integrity_check: false,
            inst_id: inst_id & INST_ID_MASK,
            datagram: false,
            request: true,
            cmd,
        }
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let [ty, flags, cmd, ..] = *bytes else {
            return None;
        };
        Some(Self {
            integrity_check: ty & FLAG_INTEGRITY != 0,
            inst_id: flags & INST_ID_MASK,
            datagram: flags & FLAG_DATAGRAM != 0,
            request: flags & FLAG_REQUEST != 0,
            cmd,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut ty = MsgType::CONTROL.as_byte();
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
        [ty, flags, self.cmd]
    }

    /// The request header with the request flag cleared.
    pub fn reply(&self) -> ReplyHeader {
        let reply = Self {
            request: false,
            ..*self
        };
        let [ty, flags, cmd] = reply.encode();
        smallvec![ty, flags, cmd]
    }
}
