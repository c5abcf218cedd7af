//! `POST /api/v2/execute`: dispatches a Command/Query operation named by the
//! `X-Unit` header against the executor.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::command::CommandError;

use super::super::AppState;

pub async fn execute(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Response {
    let operation = request
        .headers()
        .get("X-Unit")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    let Some(operation) = operation else {
        return CommandError::InvalidInput("missing X-Unit header".to_string()).into_response();
    };

    let body = request.into_body();
    let bytes = match axum::body::to_bytes(body, 1024 * 1024).await {
        Ok(b) => b,
        Err(e) => return CommandError::InvalidInput(e.to_string()).into_response(),
    };

    let input: Value = if bytes.is_empty() {
        json!({})
    } else {
        match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => return CommandError::InvalidInput(format!("malformed JSON body: {}", e)).into_response(),
        }
    };

    let result = match operation.as_str() {
        "service.create" => state.executor.create(input).await,
        "service.delete" => state.executor.delete(input).await,
        "service.scale" => state.executor.scale(input).await,
        "service.start" => state.executor.start(input).await,
        "service.stop" => state.executor.stop(input).await,
        "service.get" => state.executor.get(input).await,
        "service.list" => state.executor.list().await,
        "service.recommend" => state.executor.recommend(input).await,
        "service.status" => state.executor.status(input).await,
        other => Err(CommandError::InvalidInput(format!("unknown operation: {}", other))),
    };

    match result {
        Ok(value) => Json(json!({"success": true, "data": value})).into_response(),
        Err(err) => err.into_response(),
    }
}
