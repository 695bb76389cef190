//! Splitting messages into link packets and stitching them back together.
//!
//! [`fragment`] is used by the outbound worker and yields packets lazily so a
//! large message never needs every packet resident at once. [`Reassembler`]
//! is owned by a single inbound worker and keeps one slot per
//! `(tag, tag_owner)` pair; it is not shared and therefore carries no lock.

use tracing::warn;

use crate::error::FramingError;
use crate::header::{Eid, MsgTag, TransportHeader, HEADER_LEN, MAX_TAGS, SEQ_MASK};

/// Upper bound on a reassembled message.
pub const ASSEMBLY_LIMIT: usize = 1024;

/// Default payload bytes carried by a single packet.
pub const DEFAULT_MAX_PACKET_PAYLOAD: usize = 64;

/// A framed link packet: transport header followed by payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    raw: Vec<u8>,
    header: TransportHeader,
}

impl Packet {
    pub fn from_raw(raw: Vec<u8>) -> Result<Self, FramingError> {
        let header = TransportHeader::decode(&raw)?;
        Ok(Self { raw, header })
    }

    fn build(header: TransportHeader, payload: &[u8]) -> Self {
        let mut raw = Vec::with_capacity(HEADER_LEN + payload.len());
        raw.extend_from_slice(&header.encode());
        raw.extend_from_slice(payload);
        Self { raw, header }
    }

    pub fn header(&self) -> TransportHeader {
        self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.raw[HEADER_LEN..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }
}

/// Number of packets `len` payload bytes occupy. Empty messages still take
/// one packet.
pub fn packet_count(len: usize, max_packet_payload: usize) -> usize {
    let max = max_packet_payload.max(1);
    if len == 0 {
        1
    } else {
        len.div_ceil(max)
    }
}

/// Lazily splits a payload into packets derived from `template`.
pub struct Fragmenter<'a> {
    template: TransportHeader,
    payload: &'a [u8],
    max: usize,
    index: usize,
    count: usize,
}

/// Starts framing `payload` with the addressing and tag of `template`.
pub fn fragment(
    template: TransportHeader,
    payload: &[u8],
    max_packet_payload: usize,
) -> Fragmenter<'_> {
    let max = max_packet_payload.max(1);
    Fragmenter {
        template,
        payload,
        max,
        index: 0,
        count: packet_count(payload.len(), max),
    }
}

impl Fragmenter<'_> {
    pub fn packet_count(&self) -> usize {
        self.count
    }
}

impl Iterator for Fragmenter<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        if self.index >= self.count {
            return None;
        }
        let i = self.index;
        self.index += 1;

        let start = (i * self.max).min(self.payload.len());
        let end = (start + self.max).min(self.payload.len());

        let mut header = self.template;
        header.som = i == 0;
        header.eom = i + 1 == self.count;
        // Sequence numbers are two bits and wrap.
        header.seq = (i as u8) & SEQ_MASK;

        Some(Packet::build(header, &self.payload[start..end]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Fragmenter<'_> {}

/// A complete inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub src: Eid,
    pub dest: Eid,
    pub tag: MsgTag,
    /// Tag-owner flag as sent by the peer.
    pub tag_owner: bool,
    pub payload: Vec<u8>,
}

impl Message {
    fn new(header: TransportHeader, payload: Vec<u8>) -> Self {
        Self {
            src: header.src,
            dest: header.dest,
            tag: header.tag,
            tag_owner: header.tag_owner,
            payload,
        }
    }
}

/// Per-instance reassembly state.
pub struct Reassembler {
    slots: [[Option<Vec<u8>>; 2]; MAX_TAGS],
    limit: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_limit(ASSEMBLY_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            slots: Default::default(),
            limit,
        }
    }

    /// Feeds one packet. Returns the message once its end packet arrives.
    ///
    /// A start packet that lands on an open slot discards the stale partial
    /// message; this is logged and otherwise silent, so the sender's request
    /// simply times out.
    pub fn push(&mut self, packet: &Packet) -> Result<Option<Message>, FramingError> {
        let header = packet.header();
        let payload = packet.payload();
        let slot = &mut self.slots[header.tag.value() as usize][usize::from(header.tag_owner)];

        if header.som && header.eom {
            return Ok(Some(Message::new(header, payload.to_vec())));
        }

        if header.som {
            if slot.take().is_some() {
                warn!(
                    tag = header.tag.value(),
                    tag_owner = header.tag_owner,
                    src = %header.src,
                    "unexpected SOM, discarding partial message"
                );
            }
            if payload.len() > self.limit {
                return Err(FramingError::Oversize {
                    len: payload.len(),
                    limit: self.limit,
                });
            }
            let mut buf = Vec::with_capacity(self.limit.min(payload.len() * 4));
            buf.extend_from_slice(payload);
            *slot = Some(buf);
            return Ok(None);
        }

        let Some(buf) = slot.as_mut() else {
            return Err(FramingError::UnexpectedContinuation {
                tag: header.tag.value(),
                tag_owner: header.tag_owner,
            });
        };

        let len = buf.len() + payload.len();
        if len > self.limit {
            *slot = None;
            return Err(FramingError::Oversize {
                len,
                limit: self.limit,
            });
        }
        buf.extend_from_slice(payload);

        if !header.eom {
            return Ok(None);
        }
        let buf = slot.take().unwrap_or_default();
        Ok(Some(Message::new(header, buf)))
    }

    /// Number of partially assembled messages.
    pub fn open_slots(&self) -> usize {
        self.slots.iter().flatten().filter(|s| s.is_some()).count()
    }

    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            *slot = None;
        }
    }
}
