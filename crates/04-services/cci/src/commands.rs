//! Opcodes and payload layouts for the health and firmware commands.

/// Opcodes.
pub mod op {
    pub const GET_FW_INFO: u16 = 0x0200;
    pub const TRANSFER_FW: u16 = 0x0201;
    pub const ACTIVATE_FW: u16 = 0x0202;
    pub const GET_HEALTH_INFO: u16 = 0x4200;
}

pub const HEALTH_INFO_LEN: usize = 18;
pub const FW_INFO_LEN: usize = 80;
pub const FW_REVISION_LEN: usize = 16;
pub const FW_SLOTS: usize = 4;
pub const TRANSFER_FW_LEN: usize = 256;
/// Image bytes carried by one Transfer FW request.
pub const TRANSFER_CHUNK_LEN: usize = 128;

const FW_INFO_RESERVED: usize = 13;
const TRANSFER_DATA_OFFSET: usize = TRANSFER_FW_LEN - TRANSFER_CHUNK_LEN;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthInfo {
    pub health_status: u8,
    pub media_status: u8,
    pub additional_status: u8,
    pub life_used: u8,
    /// Device temperature in degrees Celsius.
    pub temperature: i16,
    pub dirty_shutdowns: u32,
    pub volatile_errors: u32,
    pub persistent_errors: u32,
}

impl HealthInfo {
    /// Parses the exact 18-byte response payload.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let bytes: &[u8; HEALTH_INFO_LEN] = payload.try_into().ok()?;
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        Some(Self {
            health_status: bytes[0],
            media_status: bytes[1],
            additional_status: bytes[2],
            life_used: bytes[3],
            temperature: i16::from_le_bytes([bytes[4], bytes[5]]),
            dirty_shutdowns: u32_at(6),
            volatile_errors: u32_at(10),
            persistent_errors: u32_at(14),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub slots_supported: u8,
    /// 1-based; 0 or out of range means no valid active slot.
    pub active_slot: u8,
    pub next_active_slot: u8,
    pub activation_caps: u8,
    pub revisions: [[u8; FW_REVISION_LEN]; FW_SLOTS],
}

impl FirmwareInfo {
    /// Parses the exact 80-byte response payload.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() != FW_INFO_LEN {
            return None;
        }
        let mut revisions = [[0u8; FW_REVISION_LEN]; FW_SLOTS];
        let slots = payload[3 + FW_INFO_RESERVED..].chunks_exact(FW_REVISION_LEN);
        for (revision, bytes) in revisions.iter_mut().zip(slots) {
            revision.copy_from_slice(bytes);
        }
        Some(Self {
            slots_supported: payload[0],
            active_slot: payload[1] & 0x07,
            next_active_slot: (payload[1] >> 3) & 0x07,
            activation_caps: payload[2],
            revisions,
        })
    }

    /// Revision string of the running slot.
    pub fn active_revision(&self) -> Option<&[u8; FW_REVISION_LEN]> {
        let slot = usize::from(self.active_slot).checked_sub(1)?;
        self.revisions.get(slot)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferAction {
    Full = 0,
    Initiate = 1,
    Continue = 2,
    End = 3,
    Abort = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ActivateAction {
    Online = 0,
    NextColdReset = 1,
}

/// One Transfer FW request: `[action, slot, rsvd:2, offset:4, rsvd:120,
/// data:128]`. `data` shorter than a chunk is zero padded.
pub fn transfer_request(
    action: TransferAction,
    slot: u8,
    offset: u32,
    data: &[u8],
) -> Option<[u8; TRANSFER_FW_LEN]> {
    if data.len() > TRANSFER_CHUNK_LEN {
        return None;
    }
    let mut req = [0u8; TRANSFER_FW_LEN];
    req[0] = action as u8;
    req[1] = slot;
    req[4..8].copy_from_slice(&offset.to_le_bytes());
    req[TRANSFER_DATA_OFFSET..TRANSFER_DATA_OFFSET + data.len()].copy_from_slice(data);
    Some(req)
}
