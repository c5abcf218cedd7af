//! Service Provider error kinds.

use thiserror::Error;

use crate::engine::EngineError;

use super::store::ServiceStoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] ServiceStoreError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
