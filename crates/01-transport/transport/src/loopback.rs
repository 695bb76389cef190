//! In-memory multi-drop bus.
//!
//! Every attached [`LoopbackMedium`] owns an inbound queue keyed by its bus
//! address. Writes land in the destination's queue and are also kept in a
//! wire history so tests can assert on exact bytes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{TransportError, TransportResult};
use crate::medium::{Medium, MediumAddress, MediumKind, RxFrame};

/// One packet observed on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireRecord {
    pub from: u8,
    pub to: u8,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
struct BusState {
    queues: HashMap<u8, VecDeque<(u8, Vec<u8>)>>,
    failing: HashSet<u8>,
    history: Vec<WireRecord>,
}

#[derive(Clone, Default)]
pub struct LoopbackBus {
    state: Arc<Mutex<BusState>>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a device at `addr`.
    pub fn attach(&self, addr: u8, kind: MediumKind) -> LoopbackMedium {
        self.state.lock().queues.entry(addr).or_default();
        LoopbackMedium {
            bus: self.clone(),
            addr,
            kind,
        }
    }

    /// Places raw bytes in `to`'s inbound queue as if `from` had written them.
    pub fn inject(&self, from: u8, to: u8, bytes: Vec<u8>) {
        let mut state = self.state.lock();
        state.queues.entry(to).or_default().push_back((from, bytes));
    }

    /// Makes every write from `addr` fail until cleared.
    pub fn fail_writes(&self, addr: u8, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.failing.insert(addr);
        } else {
            state.failing.remove(&addr);
        }
    }

    pub fn history(&self) -> Vec<WireRecord> {
        self.state.lock().history.clone()
    }

    pub fn clear_history(&self) {
        self.state.lock().history.clear();
    }

    pub fn pending(&self, addr: u8) -> usize {
        self.state.lock().queues.get(&addr).map_or(0, VecDeque::len)
    }
}

pub struct LoopbackMedium {
    bus: LoopbackBus,
    addr: u8,
    kind: MediumKind,
}

impl LoopbackMedium {
    pub fn addr(&self) -> u8 {
        self.addr
    }
}

impl Medium for LoopbackMedium {
    fn kind(&self) -> MediumKind {
        self.kind
    }

    fn read(&mut self) -> TransportResult<Option<RxFrame>> {
        let mut state = self.bus.state.lock();
        let next = state.queues.get_mut(&self.addr).and_then(VecDeque::pop_front);
        Ok(next.map(|(from, packet)| RxFrame {
            packet,
            from: MediumAddress::new(self.kind, from),
        }))
    }

    fn write(&mut self, packet: &[u8], to: MediumAddress) -> TransportResult<()> {
        let mut state = self.bus.state.lock();
        if state.failing.contains(&self.addr) {
            return Err(TransportError::medium(format!(
                "injected write failure at {:#04x}",
                self.addr
            )));
        }
        let Some(queue) = state.queues.get_mut(&to.addr) else {
            return Err(TransportError::medium(format!(
                "no device at {:#04x}",
                to.addr
            )));
        };
        queue.push_back((self.addr, packet.to_vec()));
        state.history.push(WireRecord {
            from: self.addr,
            to: to.addr,
            bytes: packet.to_vec(),
        });
        Ok(())
    }
}
