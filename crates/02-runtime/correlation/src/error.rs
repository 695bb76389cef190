use thiserror::Error;

pub type CorrelationResult<T> = Result<T, CorrelationError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    /// An exchange with an equal key is already waiting.
    #[error("a request keyed {key} is already pending")]
    DuplicateKey { key: String },

    /// The engine was shut down.
    #[error("correlation engine is shut down")]
    Closed,

    #[error("failed to spawn sweeper thread: {0}")]
    SweeperSpawn(String),
}

/// Failure of a synchronous read.
#[derive(Debug, Error)]
pub enum ReadError<E> {
    /// No attempt produced an accepted response.
    #[error("no response after {attempts} attempts")]
    ReadTimeout { attempts: u32 },

    /// The attempt closure failed in a way retrying cannot fix.
    #[error("request failed: {0}")]
    Fatal(E),
}
