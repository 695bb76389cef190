use transport::MsgType;

pub const HEADER_LEN: usize = 13;
/// Payload length is a 21-bit field.
pub const MAX_PAYLOAD: usize = 0x1F_FFFF;

const PL_LEN_MASK: u32 = 0x1F_FFFF;
const FLAG_BACKGROUND: u32 = 1 << 23;

/// `[type|IC] [req/resp] [tag] [rsvd] [op:16] [pl_len:21 rsvd:2 BO:1]
/// [ret:16] [stat:16]`, multi-byte fields little endian.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CciHeader {
    pub response: bool,
    pub tag: u8,
    pub op: u16,
    pub payload_len: u32,
    pub background: bool,
    pub ret: u16,
    pub stat: u16,
}

impl CciHeader {
    pub fn request(tag: u8, op: u16, payload_len: u32) -> Self {
        Self {
            tag,
            op,
            payload_len: payload_len & PL_LEN_MASK,
            ..Self::default()
        }
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let header = bytes.get(..HEADER_LEN)?;
        let len = u32::from_le_bytes([header[6], header[7], header[8], 0]);
        Some(Self {
            response: header[1] != 0,
            tag: header[2],
            op: u16::from_le_bytes([header[4], header[5]]),
            payload_len: len & PL_LEN_MASK,
            background: len & FLAG_BACKGROUND != 0,
            ret: u16::from_le_bytes([header[9], header[10]]),
            stat: u16::from_le_bytes([header[11], header[12]]),
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut len = self.payload_len & PL_LEN_MASK;
        if self.background {
            len |= FLAG_BACKGROUND;
        }
        let [l0, l1, l2, _] = len.to_le_bytes();
        let [op0, op1] = self.op.to_le_bytes();
        let [r0, r1] = self.ret.to_le_bytes();
        let [s0, s1] = self.stat.to_le_bytes();
        [
            MsgType::CCI.as_byte(),
            u8::from(self.response),
            self.tag,
            0x00,
            op0,
            op1,
            l0,
            l1,
            l2,
            r0,
            r1,
            s0,
            s1,
        ]
    }
}
