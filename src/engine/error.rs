//! Engine Provider error kinds.

use thiserror::Error;

use crate::runtime::RuntimeError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Port held by a container this system does not manage. Never retried.
    #[error("port occupied by unmanaged container: {0}")]
    PortOccupied(String),

    /// Caller context expired; cleanup has already run.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Container still running, but the health probe never succeeded within
    /// the startup window.
    #[error("health check timed out: {0}")]
    HealthTimeout(String),

    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Fatal errors short-circuit the Start retry loop rather than being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::PortOccupied(_) | EngineError::Cancelled(_))
    }
}

impl From<RuntimeError> for EngineError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(m) => EngineError::NotFound(m),
            RuntimeError::Busy(m) => EngineError::Conflict(m),
            RuntimeError::Invalid(m) => EngineError::InvalidInput(m),
            RuntimeError::Transport(m) => EngineError::Unavailable(m),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
