//! Wire-level primitives for the segmented management transport.
//!
//! * [`TransportHeader`] – the 4-byte prefix carried by every link packet.
//! * [`fragment`] / [`Reassembler`] – message splitting and per-tag reassembly.
//! * [`Medium`] – polled raw-frame I/O, with [`smbus`] and [`i3c`] bindings
//!   and an in-memory [`loopback`] bus.
//! * [`TransportError`] / [`FramingError`] – the small error surface shared
//!   by everything above the wire.

mod error;
mod framer;
mod header;
pub mod i3c;
pub mod loopback;
mod medium;
pub mod smbus;

pub use error::{FramingError, TransportError, TransportResult};
pub use framer::{
    fragment, packet_count, Fragmenter, Message, Packet, Reassembler, ASSEMBLY_LIMIT,
    DEFAULT_MAX_PACKET_PAYLOAD,
};
pub use header::{
    Eid, MsgTag, MsgType, TransportHeader, HDR_VERSION, HEADER_LEN, MAX_TAGS, SEQ_MASK, TAG_MASK,
};
pub use medium::{Medium, MediumAddress, MediumConfig, MediumKind, RxFrame};
