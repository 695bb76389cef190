//! Physical medium abstraction.
//!
//! A [`Medium`] moves raw link packets and knows nothing about framing. Both
//! supported families (a shared multi-drop bus and the hub-bus sideband) only
//! offer polled reception, so `read` must return immediately.

use serde::{Deserialize, Serialize};

use crate::error::TransportResult;

/// Physical medium family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediumKind {
    Smbus,
    I3cController,
    I3cTarget,
}

/// Bus binding for a transport instance. Immutable once configured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediumConfig {
    Smbus { bus: u8, addr: u8 },
    I3cController { bus: u8, addr: u8 },
    I3cTarget { bus: u8, addr: u8 },
}

impl MediumConfig {
    pub fn kind(&self) -> MediumKind {
        match self {
            MediumConfig::Smbus { .. } => MediumKind::Smbus,
            MediumConfig::I3cController { .. } => MediumKind::I3cController,
            MediumConfig::I3cTarget { .. } => MediumKind::I3cTarget,
        }
    }

    pub fn bus(&self) -> u8 {
        match *self {
            MediumConfig::Smbus { bus, .. }
            | MediumConfig::I3cController { bus, .. }
            | MediumConfig::I3cTarget { bus, .. } => bus,
        }
    }

    /// Own address on the bus.
    pub fn addr(&self) -> u8 {
        match *self {
            MediumConfig::Smbus { addr, .. }
            | MediumConfig::I3cController { addr, .. }
            | MediumConfig::I3cTarget { addr, .. } => addr,
        }
    }
}

/// Medium-level address of a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MediumAddress {
    pub kind: MediumKind,
    pub addr: u8,
}

impl MediumAddress {
    pub const fn new(kind: MediumKind, addr: u8) -> Self {
        Self { kind, addr }
    }

    pub const fn smbus(addr: u8) -> Self {
        Self::new(MediumKind::Smbus, addr)
    }
}

/// A raw packet read from the medium together with the sender's address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RxFrame {
    pub packet: Vec<u8>,
    pub from: MediumAddress,
}

/// Raw frame I/O for one bus binding.
pub trait Medium: Send + 'static {
    fn kind(&self) -> MediumKind;

    /// Returns the next inbound packet, or `None` when nothing is pending.
    /// Never blocks.
    fn read(&mut self) -> TransportResult<Option<RxFrame>>;

    /// Writes one framed packet to `to`.
    fn write(&mut self, packet: &[u8], to: MediumAddress) -> TransportResult<()>;
}

impl<M: Medium + ?Sized> Medium for Box<M> {
    fn kind(&self) -> MediumKind {
        (**self).kind()
    }

    fn read(&mut self) -> TransportResult<Option<RxFrame>> {
        (**self).read()
    }

    fn write(&mut self, packet: &[u8], to: MediumAddress) -> TransportResult<()> {
        (**self).write(packet, to)
    }
}
