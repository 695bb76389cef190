use transport::MsgType;

/// Message type byte plus the 16-byte control packet header.
pub const HEADER_LEN: usize = 17;
/// Largest payload the 12-bit length field can describe.
pub const MAX_PAYLOAD: usize = 0x0FFF;
pub const HEADER_REVISION: u8 = 0x01;
/// Management controller id used on every request.
pub const MC_ID: u8 = 0x00;

const FLAG_RESPONSE: u8 = 0x80;
const COMMAND_MASK: u8 = 0x7F;

/// `[type] [mc_id] [rev] [rsvd] [iid] [response:1 command:7] [channel]
/// [rsvd:4 len_hi:4] [len_lo] [8 reserved]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NcsiHeader {
    pub mc_id: u8,
    pub revision: u8,
    pub iid: u8,
    pub command: u8,
    pub response: bool,
    pub channel: u8,
    pub payload_len: u16,
}

impl NcsiHeader {
    /// Request header; `payload_len` must fit in 12 bits.
    pub fn request(iid: u8, command: u8, channel: u8, payload_len: u16) -> Self {
        Self {
            mc_id: MC_ID,
            revision: HEADER_REVISION,
            iid,
            command: command & COMMAND_MASK,
            response: false,
            channel,
            payload_len: payload_len & MAX_PAYLOAD as u16,
        }
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let header = bytes.get(..HEADER_LEN)?;
        Some(Self {
            mc_id: header[1],
            revision: header[2],
            iid: header[4],
            command: header[5] & COMMAND_MASK,
            response: header[5] & FLAG_RESPONSE != 0,
            channel: header[6],
            payload_len: (u16::from(header[7] & 0x0F) << 8) | u16::from(header[8]),
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = MsgType::NCSI.as_byte();
        out[1] = self.mc_id;
        out[2] = self.revision;
        out[4] = self.iid;
        out[5] = self.command & COMMAND_MASK;
        if self.response {
            out[5] |= FLAG_RESPONSE;
        }
        out[6] = self.channel;
        out[7] = ((self.payload_len >> 8) & 0x0F) as u8;
        out[8] = self.payload_len as u8;
        out
    }
}

/// Response payload: response and reason codes, then command data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NcsiResponse {
    pub response_code: u16,
    pub reason_code: u16,
    pub data: Vec<u8>,
}

impl NcsiResponse {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let [r0, r1, c0, c1, ref data @ ..] = *payload else {
            return None;
        };
        Some(Self {
            response_code: u16::from_be_bytes([r0, r1]),
            reason_code: u16::from_be_bytes([c0, c1]),
            data: data.to_vec(),
        })
    }
}
