//! Command/Query surface outermost error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::engine::EngineError;
use crate::service::ServiceError;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("port occupied: {0}")]
    PortOccupied(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("health check timed out: {0}")]
    HealthTimeout(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for CommandError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidInput(m) => CommandError::InvalidInput(m),
            ServiceError::NotFound(m) => CommandError::NotFound(m),
            ServiceError::Conflict(m) => CommandError::Conflict(m),
            ServiceError::Engine(e) => CommandError::from(e),
            ServiceError::Store(e) => CommandError::Internal(e.to_string()),
        }
    }
}

impl From<EngineError> for CommandError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidInput(m) => CommandError::InvalidInput(m),
            EngineError::NotFound(m) => CommandError::NotFound(m),
            EngineError::Conflict(m) => CommandError::Conflict(m),
            EngineError::PortOccupied(m) => CommandError::PortOccupied(m),
            EngineError::Cancelled(m) => CommandError::Cancelled(m),
            EngineError::HealthTimeout(m) => CommandError::HealthTimeout(m),
            EngineError::Unavailable(m) => CommandError::Unavailable(m),
            EngineError::Internal(m) => CommandError::Internal(m),
        }
    }
}

impl CommandError {
    fn code(&self) -> &'static str {
        match self {
            CommandError::InvalidInput(_) => "INVALID_INPUT",
            CommandError::NotFound(_) => "NOT_FOUND",
            CommandError::Conflict(_) => "CONFLICT",
            CommandError::PortOccupied(_) => "PORT_OCCUPIED",
            CommandError::Cancelled(_) => "CANCELLED",
            CommandError::HealthTimeout(_) => "HEALTH_TIMEOUT",
            CommandError::Unavailable(_) => "UNAVAILABLE",
            CommandError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            CommandError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CommandError::NotFound(_) => StatusCode::NOT_FOUND,
            CommandError::Conflict(_) => StatusCode::CONFLICT,
            CommandError::PortOccupied(_) => StatusCode::CONFLICT,
            CommandError::Cancelled(_) => StatusCode::REQUEST_TIMEOUT,
            CommandError::HealthTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CommandError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CommandError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        (
            status,
            Json(json!({
                "success": false,
                "error": {
                    "code": code,
                    "message": self.to_string(),
                }
            })),
        )
            .into_response()
    }
}
