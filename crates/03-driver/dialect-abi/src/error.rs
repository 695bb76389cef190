use thiserror::Error;

use correlation::{CorrelationError, ReadError};
use transport::TransportError;
use transport_fabric::FabricError;

/// Why a command handler could not produce a normal response. Each dialect
/// maps these onto its own completion codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("unsupported command {0:#04x}")]
    UnknownCommand(u8),
    #[error("invalid request length")]
    InvalidLength,
    #[error("invalid request data")]
    InvalidData,
    #[error("responder not ready")]
    NotReady,
    #[error("command failed")]
    Failed,
}

/// Client-side failures of a dialect exchange.
#[derive(Debug, Error)]
pub enum DialectError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Fabric(#[from] FabricError),

    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    #[error("no response after {attempts} attempts")]
    ReadTimeout { attempts: u32 },

    #[error("peer returned completion code {code:#06x}")]
    Completion { code: u16 },

    #[error("malformed response: {0}")]
    Malformed(&'static str),
}

impl From<ReadError<DialectError>> for DialectError {
    fn from(err: ReadError<DialectError>) -> Self {
        match err {
            ReadError::ReadTimeout { attempts } => DialectError::ReadTimeout { attempts },
            ReadError::Fatal(inner) => inner,
        }
    }
}

pub type DialectResult<T> = Result<T, DialectError>;
