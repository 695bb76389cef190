//! Per-instance identifier state for the dialects.
//!
//! Request dialects need a short identifier to pair a response with its
//! request. Some take it from a modular counter, others from a pool whose
//! ids stay reserved until the exchange ends. Both live on the transport
//! instance so every port numbers its exchanges independently.

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::error::{FabricError, FabricResult};

/// Pool size for the platform-monitoring dialect (5-bit instance ids).
pub const PLDM_INSTANCE_IDS: usize = 32;
/// Pool size for the network-controller sideband dialect.
pub const NCSI_INSTANCE_IDS: usize = 256;

/// Bitmap allocator with a rolling cursor.
///
/// Allocation starts just past the last id handed out, so a freshly
/// released id is not reused immediately.
pub struct InstanceIdPool {
    inner: Mutex<PoolState>,
    capacity: usize,
}

struct PoolState {
    used: Vec<bool>,
    cursor: usize,
}

impl InstanceIdPool {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0 && capacity <= 256);
        Self {
            inner: Mutex::new(PoolState {
                used: vec![false; capacity],
                cursor: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn allocate(&self) -> FabricResult<u8> {
        let mut state = self.inner.lock();
        for step in 0..self.capacity {
            let id = (state.cursor + step) % self.capacity;
            if !state.used[id] {
                state.used[id] = true;
                state.cursor = (id + 1) % self.capacity;
                // capacity never exceeds 256
                return Ok(id as u8);
            }
        }
        Err(FabricError::PoolExhausted {
            capacity: self.capacity,
        })
    }

    /// Returns `id` to the pool. Releasing a free or out-of-range id is a
    /// no-op and reports `false`.
    pub fn release(&self, id: u8) -> bool {
        let mut state = self.inner.lock();
        match state.used.get_mut(usize::from(id)) {
            Some(slot) if *slot => {
                *slot = false;
                true
            }
            _ => false,
        }
    }

    pub fn in_use(&self) -> usize {
        self.inner.lock().used.iter().filter(|used| **used).count()
    }
}

/// Wrapping counter masked to the dialect's id width.
pub struct TagCounter {
    next: AtomicU8,
    mask: u8,
}

impl TagCounter {
    pub const fn new(mask: u8) -> Self {
        Self {
            next: AtomicU8::new(0),
            mask,
        }
    }

    pub fn next(&self) -> u8 {
        self.next.fetch_add(1, Ordering::Relaxed) & self.mask
    }
}

/// Identifier state the dialects keep per instance.
pub struct DialectIds {
    /// Control dialect instance ids (5-bit).
    pub control: TagCounter,
    pub pldm: InstanceIdPool,
    pub ncsi: InstanceIdPool,
    /// CCI message tags (8-bit).
    pub cci: TagCounter,
}

impl Default for DialectIds {
    fn default() -> Self {
        Self {
            control: TagCounter::new(0x1F),
            pldm: InstanceIdPool::new(PLDM_INSTANCE_IDS),
            ncsi: InstanceIdPool::new(NCSI_INSTANCE_IDS),
            cci: TagCounter::new(0xFF),
        }
    }
}
