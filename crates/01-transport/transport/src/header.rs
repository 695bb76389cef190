//! Transport packet header and the small identifier types carried in it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FramingError;

/// Header version written into every packet.
pub const HDR_VERSION: u8 = 0x01;
/// Size in bytes of the transport header prefix.
pub const HEADER_LEN: usize = 4;
/// Packet sequence numbers roll over at this mask.
pub const SEQ_MASK: u8 = 0x03;
/// Message tags are three bits wide.
pub const TAG_MASK: u8 = 0x07;
/// Number of distinct message tags.
pub const MAX_TAGS: usize = 8;

const FLAG_TAG_OWNER: u8 = 0x08;
const SEQ_SHIFT: u8 = 4;
const FLAG_EOM: u8 = 0x40;
const FLAG_SOM: u8 = 0x80;

const MSG_TYPE_MASK: u8 = 0x7F;
const MSG_IC_BIT: u8 = 0x80;

/// Logical endpoint identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Eid(pub u8);

impl Eid {
    /// Null endpoint; packets addressed to it are handled locally.
    pub const NULL: Eid = Eid(0x00);
    /// Endpoint id an instance starts with before any assignment.
    pub const DEFAULT: Eid = Eid(0x0A);

    pub fn is_null(self) -> bool {
        self == Eid::NULL
    }
}

impl fmt::Debug for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Eid({:#04x})", self.0)
    }
}

impl fmt::Display for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Three-bit message tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct MsgTag(u8);

impl MsgTag {
    pub const fn new(value: u8) -> Self {
        MsgTag(value & TAG_MASK)
    }

    pub const fn value(self) -> u8 {
        self.0
    }
}

/// Message type carried in the first payload byte of every message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MsgType(pub u8);

impl MsgType {
    pub const CONTROL: MsgType = MsgType(0x00);
    pub const PLDM: MsgType = MsgType(0x01);
    pub const NCSI: MsgType = MsgType(0x02);
    pub const ETHERNET: MsgType = MsgType(0x03);
    pub const NVME: MsgType = MsgType(0x04);
    pub const CCI: MsgType = MsgType(0x08);
    pub const VENDOR_PCI: MsgType = MsgType(0x7E);
    pub const VENDOR_IANA: MsgType = MsgType(0x7F);

    /// Reads the message type from the first payload byte, ignoring the
    /// integrity-check bit.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        payload.first().map(|b| MsgType(b & MSG_TYPE_MASK))
    }

    /// Whether the message carries an integrity check.
    pub fn integrity_check(payload: &[u8]) -> bool {
        payload.first().is_some_and(|b| b & MSG_IC_BIT != 0)
    }

    /// First header byte with the integrity-check bit cleared.
    pub const fn as_byte(self) -> u8 {
        self.0 & MSG_TYPE_MASK
    }
}

/// The 4-byte prefix of every link packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportHeader {
    pub version: u8,
    pub dest: Eid,
    pub src: Eid,
    pub tag: MsgTag,
    /// Set when the sender allocated the tag (a request).
    pub tag_owner: bool,
    pub seq: u8,
    pub som: bool,
    pub eom: bool,
}

impl TransportHeader {
    /// Header template for a single-packet message; the framer adjusts
    /// `seq`, `som` and `eom` per packet.
    pub fn new(dest: Eid, src: Eid, tag: MsgTag, tag_owner: bool) -> Self {
        Self {
            version: HDR_VERSION,
            dest,
            src,
            tag,
            tag_owner,
            seq: 0,
            som: true,
            eom: true,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FramingError> {
        if bytes.len() < HEADER_LEN {
            return Err(FramingError::Truncated { len: bytes.len() });
        }
        let flags = bytes[3];
        Ok(Self {
            version: bytes[0],
            dest: Eid(bytes[1]),
            src: Eid(bytes[2]),
            tag: MsgTag::new(flags),
            tag_owner: flags & FLAG_TAG_OWNER != 0,
            seq: (flags >> SEQ_SHIFT) & SEQ_MASK,
            eom: flags & FLAG_EOM != 0,
            som: flags & FLAG_SOM != 0,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        [self.version, self.dest.0, self.src.0, self.flags()]
    }

    pub fn flags(&self) -> u8 {
        let mut flags = self.tag.value() | ((self.seq & SEQ_MASK) << SEQ_SHIFT);
        if self.tag_owner {
            flags |= FLAG_TAG_OWNER;
        }
        if self.eom {
            flags |= FLAG_EOM;
        }
        if self.som {
            flags |= FLAG_SOM;
        }
        flags
    }
}
