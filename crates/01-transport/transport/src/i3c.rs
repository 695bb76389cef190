//! I3C binding for both bus roles.
//!
//! I3C private transfers carry the transport packet verbatim. A controller
//! writes to a target's dynamic address; a target cannot initiate a write,
//! so it pends the packet and raises an in-band interrupt for the controller
//! to collect.

use tracing::trace;

use crate::error::{TransportError, TransportResult};
use crate::medium::{Medium, MediumAddress, MediumKind, RxFrame};

/// Raw private-transfer I/O supplied by the I3C driver.
pub trait I3cBus: Send + 'static {
    /// Controller side: private write to the target at `addr`.
    fn private_write(&mut self, addr: u8, bytes: &[u8]) -> TransportResult<()>;

    /// Next completed private transfer and the peer's address, if any.
    fn private_read(&mut self) -> TransportResult<Option<(u8, Vec<u8>)>>;

    /// Target side: queue `bytes` for the controller and raise an IBI.
    fn pend_ibi(&mut self, bytes: &[u8]) -> TransportResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum I3cRole {
    Controller,
    Target,
}

pub struct I3cMedium<B> {
    bus: B,
    role: I3cRole,
}

impl<B: I3cBus> I3cMedium<B> {
    pub fn controller(bus: B) -> Self {
        Self {
            bus,
            role: I3cRole::Controller,
        }
    }

    pub fn target(bus: B) -> Self {
        Self {
            bus,
            role: I3cRole::Target,
        }
    }

    pub fn role(&self) -> I3cRole {
        self.role
    }
}

impl<B: I3cBus> Medium for I3cMedium<B> {
    fn kind(&self) -> MediumKind {
        match self.role {
            I3cRole::Controller => MediumKind::I3cController,
            I3cRole::Target => MediumKind::I3cTarget,
        }
    }

    fn read(&mut self) -> TransportResult<Option<RxFrame>> {
        Ok(self.bus.private_read()?.map(|(addr, packet)| RxFrame {
            packet,
            from: MediumAddress::new(self.kind(), addr),
        }))
    }

    fn write(&mut self, packet: &[u8], to: MediumAddress) -> TransportResult<()> {
        match self.role {
            I3cRole::Controller => {
                if to.addr == 0 {
                    return Err(TransportError::InvalidConfig(
                        "i3c controller needs a target dynamic address",
                    ));
                }
                trace!(len = packet.len(), dest = to.addr, "i3c private write");
                self.bus.private_write(to.addr, packet)
            }
            I3cRole::Target => {
                trace!(len = packet.len(), "i3c ibi pending");
                self.bus.pend_ibi(packet)
            }
        }
    }
}
