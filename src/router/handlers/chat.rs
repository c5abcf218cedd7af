//! `POST /v1/chat/completions`: client-facing chat endpoint forwarded through
//! the Inference Dispatcher to whichever backend serves the requested model.

use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::dispatch::{ChatMessage, ChatOptions};

use super::super::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

pub async fn chat_completions(
    State(state): State<AppState>,
    Json(req): Json<ChatCompletionRequest>,
) -> impl IntoResponse {
    let messages = req
        .messages
        .into_iter()
        .map(|m| ChatMessage {
            role: m.role,
            content: m.content,
        })
        .collect();

    let options = ChatOptions {
        temperature: req.temperature,
        max_tokens: req.max_tokens,
    };

    match state.dispatcher.chat(&req.model, messages, options).await {
        Ok(response) => Json(json!(response)).into_response(),
        Err(e) => {
            let status = axum::http::StatusCode::BAD_GATEWAY;
            (
                status,
                Json(json!({
                    "success": false,
                    "error": {"code": "DISPATCH_FAILED", "message": e.to_string()}
                })),
            )
                .into_response()
        }
    }
}
