//! SMBus binding: block-write framing with a trailing packet error code.
//!
//! Outbound frame layout:
//!
//! ```text
//! [0x0F][byte count = 1 + len][source addr | 1][transport packet ...][PEC]
//! ```
//!
//! Addresses are 8-bit (write form). The PEC is CRC-8/SMBUS over the
//! destination address followed by every frame byte before the PEC itself.

use crc::{Crc, CRC_8_SMBUS};
use tracing::{trace, warn};

use crate::error::{FramingError, TransportError, TransportResult};
use crate::header::HEADER_LEN;
use crate::medium::{Medium, MediumAddress, MediumKind, RxFrame};

/// Command code identifying transport traffic on the bus.
pub const SMBUS_CMD_CODE: u8 = 0x0F;
const SMBUS_HDR_LEN: usize = 3;
const PEC_LEN: usize = 1;
/// Largest transport packet payload that fits one SMBus block: the byte
/// count tops out at 255 and covers the source address and the transport
/// header.
pub const SMBUS_MAX_PACKET_PAYLOAD: usize = 255 - 1 - HEADER_LEN;

const PEC: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Raw block I/O supplied by the bus driver.
pub trait SmbusBus: Send + 'static {
    /// Writes `bytes` as a block to the 8-bit address `addr`.
    fn write_block(&mut self, addr: u8, bytes: &[u8]) -> TransportResult<()>;

    /// Returns the next block received while acting as a target, if any.
    fn read_block(&mut self) -> TransportResult<Option<Vec<u8>>>;
}

pub fn pec(dest_addr: u8, bytes: &[u8]) -> u8 {
    let mut digest = PEC.digest();
    digest.update(&[dest_addr]);
    digest.update(bytes);
    digest.finalize()
}

/// Wraps a transport packet for the wire.
pub fn encode_frame(own_addr: u8, dest_addr: u8, packet: &[u8]) -> TransportResult<Vec<u8>> {
    let byte_count = u8::try_from(packet.len() + 1)
        .map_err(|_| TransportError::InvalidConfig("smbus block exceeds 255 bytes"))?;
    let mut frame = Vec::with_capacity(SMBUS_HDR_LEN + packet.len() + PEC_LEN);
    frame.push(SMBUS_CMD_CODE);
    frame.push(byte_count);
    // Bit 0 of the source address is always set.
    frame.push(own_addr.wrapping_add(1));
    frame.extend_from_slice(packet);
    frame.push(pec(dest_addr, &frame));
    Ok(frame)
}

/// Strips the SMBus envelope from a received block. Returns the transport
/// packet and the sender's 8-bit address.
pub fn decode_frame(own_addr: u8, frame: &[u8]) -> Result<(Vec<u8>, u8), FramingError> {
    if frame.len() < SMBUS_HDR_LEN {
        return Err(FramingError::Truncated { len: frame.len() });
    }
    // The byte count covers the source address, so it is never zero.
    if frame[1] == 0 {
        return Err(FramingError::Truncated { len: frame.len() });
    }
    let byte_count = usize::from(frame[1]);
    let has_pec = match frame.len().checked_sub(byte_count) {
        Some(3) => true,
        Some(2) => false,
        _ => {
            return Err(FramingError::ByteCountMismatch {
                count: frame[1],
                len: frame.len(),
            })
        }
    };

    if has_pec {
        let (body, tail) = frame.split_at(frame.len() - PEC_LEN);
        let expected = pec(own_addr, body);
        if expected != tail[0] {
            return Err(FramingError::BadPec {
                expected,
                actual: tail[0],
            });
        }
    }

    if frame[0] != SMBUS_CMD_CODE {
        return Err(FramingError::BadCommandCode(frame[0]));
    }

    let end = frame.len() - usize::from(has_pec);
    let sender = frame[2].wrapping_sub(1);
    Ok((frame[SMBUS_HDR_LEN..end].to_vec(), sender))
}

/// [`Medium`] over an SMBus target/controller pair.
pub struct SmbusMedium<B> {
    bus: B,
    own_addr: u8,
}

impl<B: SmbusBus> SmbusMedium<B> {
    pub fn new(bus: B, own_addr: u8) -> Self {
        Self { bus, own_addr }
    }

    pub fn own_addr(&self) -> u8 {
        self.own_addr
    }
}

impl<B: SmbusBus> Medium for SmbusMedium<B> {
    fn kind(&self) -> MediumKind {
        MediumKind::Smbus
    }

    fn read(&mut self) -> TransportResult<Option<RxFrame>> {
        let Some(block) = self.bus.read_block()? else {
            return Ok(None);
        };
        match decode_frame(self.own_addr, &block) {
            Ok((packet, sender)) => {
                trace!(len = packet.len(), sender, "smbus frame received");
                Ok(Some(RxFrame {
                    packet,
                    from: MediumAddress::smbus(sender),
                }))
            }
            Err(err) => {
                warn!("dropping smbus frame: {err}");
                Ok(None)
            }
        }
    }

    fn write(&mut self, packet: &[u8], to: MediumAddress) -> TransportResult<()> {
        if to.kind != MediumKind::Smbus {
            return Err(TransportError::InvalidConfig(
                "smbus medium cannot address a non-smbus peer",
            ));
        }
        let frame = encode_frame(self.own_addr, to.addr, packet)?;
        trace!(len = frame.len(), dest = to.addr, "smbus frame sent");
        self.bus.write_block(to.addr, &frame)
    }
}
