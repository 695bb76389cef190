use thiserror::Error;

use transport::{Eid, TransportError};

pub type FabricResult<T> = Result<T, FabricError>;

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid fabric configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("no route to endpoint {0}")]
    Unresolved(Eid),

    #[error("no port bound to bus {0}")]
    UnknownBus(u8),

    #[error("instance id pool exhausted ({capacity} ids in flight)")]
    PoolExhausted { capacity: usize },
}
