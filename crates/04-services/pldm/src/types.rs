//! Per-type command tables and the base type's discovery commands.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use dialect_abi::{CommandTable, DispatchError, HandlerOutcome, Request};

use crate::header::{cc, pldm_type};

/// Bytes in a Get PLDM Types bitmap.
pub const TYPE_BITMAP_LEN: usize = 8;
/// Bytes in a Get PLDM Commands bitmap.
pub const COMMAND_BITMAP_LEN: usize = 32;

/// Base type commands.
pub mod base_cmd {
    pub const GET_TID: u8 = 0x02;
    pub const GET_PLDM_TYPES: u8 = 0x04;
    pub const GET_PLDM_COMMANDS: u8 = 0x05;
}

/// Command tables indexed by PLDM type.
#[derive(Default)]
pub struct TypeTable {
    types: RwLock<BTreeMap<u8, Arc<CommandTable>>>,
}

impl TypeTable {
    /// The command table for `ty`, created empty on first use.
    pub fn commands(&self, ty: u8) -> Arc<CommandTable> {
        if let Some(table) = self.types.read().get(&ty) {
            return Arc::clone(table);
        }
        Arc::clone(self.types.write().entry(ty).or_default())
    }

    pub fn get(&self, ty: u8) -> Option<Arc<CommandTable>> {
        self.types.read().get(&ty).cloned()
    }

    /// Bit `ty` is set for every type with a table.
    pub fn supported_types(&self) -> [u8; TYPE_BITMAP_LEN] {
        let mut bitmap = [0u8; TYPE_BITMAP_LEN];
        for &ty in self.types.read().keys() {
            if let Some(byte) = bitmap.get_mut(usize::from(ty / 8)) {
                *byte |= 1 << (ty % 8);
            }
        }
        bitmap
    }

    /// Bit `cmd` is set for every command registered under `ty`; `None`
    /// when the type is unknown.
    pub fn supported_commands(&self, ty: u8) -> Option<[u8; COMMAND_BITMAP_LEN]> {
        let table = self.get(ty)?;
        let mut bitmap = [0u8; COMMAND_BITMAP_LEN];
        for cmd in table.commands() {
            bitmap[usize::from(cmd / 8)] |= 1 << (cmd % 8);
        }
        Some(bitmap)
    }
}

type HandlerResult = Result<HandlerOutcome, DispatchError>;

pub(crate) fn install_base(types: &Arc<TypeTable>, tid: u8) {
    let base = types.commands(pldm_type::BASE);
    base.register(
        base_cmd::GET_TID,
        Arc::new(move |_: &Request<'_>| -> HandlerResult {
            Ok(HandlerOutcome::Reply(vec![cc::SUCCESS, tid]))
        }),
    );

    let table = Arc::downgrade(types);
    base.register(
        base_cmd::GET_PLDM_TYPES,
        Arc::new(move |_: &Request<'_>| -> HandlerResult {
            let table = table.upgrade().ok_or(DispatchError::NotReady)?;
            let mut body = vec![cc::SUCCESS];
            body.extend_from_slice(&table.supported_types());
            Ok(HandlerOutcome::Reply(body))
        }),
    );

    let table = Arc::downgrade(types);
    base.register(
        base_cmd::GET_PLDM_COMMANDS,
        Arc::new(move |req: &Request<'_>| -> HandlerResult {
            let table = table.upgrade().ok_or(DispatchError::NotReady)?;
            let &[ty, ..] = req.body else {
                return Err(DispatchError::InvalidLength);
            };
            let Some(bitmap) = table.supported_commands(ty) else {
                return Ok(HandlerOutcome::Reply(vec![cc::INVALID_PLDM_TYPE]));
            };
            let mut body = vec![cc::SUCCESS];
            body.extend_from_slice(&bitmap);
            Ok(HandlerOutcome::Reply(body))
        }),
    );
}
