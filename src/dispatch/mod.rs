//! Inference Dispatcher: resolves a model name to a running service endpoint,
//! detects the backend protocol, and forwards/normalizes chat completions.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::service::{ServiceStatus, ServiceStore};

const MODELS_PROBE_LIMIT: usize = 1024 * 1024;
const RESPONSE_READ_LIMIT: usize = 10 * 1024 * 1024;
const OLLAMA_MARKER: &str = ":11434";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("no running service for model: {0}")]
    NoRunningService(String),

    #[error("backend request failed: {0}")]
    Backend(#[from] reqwest::Error),

    #[error("backend response too large")]
    ResponseTooLarge,

    #[error("backend returned malformed response: {0}")]
    Malformed(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

/// Normalized response shape, regardless of backend protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub finish_reason: String,
    pub model: String,
    pub id: String,
    pub created: i64,
    pub system_fingerprint: Option<String>,
    pub usage: Usage,
}

pub struct InferenceDispatcher {
    store: Arc<dyn ServiceStore>,
    client: reqwest::Client,
}

impl InferenceDispatcher {
    pub fn new(store: Arc<dyn ServiceStore>) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
        }
    }

    pub async fn chat(
        &self,
        model_name: &str,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> DispatchResult<ChatResponse> {
        let model_id = self.resolve_model(model_name).await?;

        let services = self.store.list().await.map_err(|e| {
            DispatchError::Malformed(format!("failed to list services: {}", e))
        })?;

        let candidate = services
            .into_iter()
            .find(|s| s.status == ServiceStatus::Running && s.model_id == model_id)
            .ok_or_else(|| DispatchError::NoRunningService(model_id.clone()))?;

        let endpoint = candidate
            .endpoints
            .first()
            .cloned()
            .ok_or_else(|| DispatchError::NoRunningService(model_id.clone()))?;

        if endpoint.contains(OLLAMA_MARKER) {
            self.dispatch_ollama(&endpoint, &model_id, messages, options).await
        } else {
            self.dispatch_openai(&endpoint, &model_id, messages, options).await
        }
    }

    async fn resolve_model(&self, input: &str) -> DispatchResult<String> {
        let services = self.store.list().await.map_err(|e| {
            DispatchError::Malformed(format!("failed to list services: {}", e))
        })?;

        let lower = input.to_ascii_lowercase();
        if let Some(found) = services
            .iter()
            .find(|s| s.name.to_ascii_lowercase() == lower || s.model_id == input)
        {
            return Ok(found.model_id.clone());
        }

        // Not found in the catalog: treat the input as a model id directly.
        Ok(input.to_string())
    }

    async fn dispatch_openai(
        &self,
        endpoint: &str,
        model_id: &str,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> DispatchResult<ChatResponse> {
        let server_model = self.probe_openai_model(endpoint, model_id).await;

        let mut body = json!({
            "model": server_model,
            "messages": messages.iter().map(|m| json!({"role": m.role, "content": m.content})).collect::<Vec<_>>(),
        });
        if let Some(t) = options.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(mt) = options.max_tokens {
            body["max_tokens"] = json!(mt);
        }

        let url = format!("{}/v1/chat/completions", endpoint.trim_end_matches('/'));
        let resp = self.client.post(&url).json(&body).send().await?;
        let bytes = read_bounded(resp, RESPONSE_READ_LIMIT).await?;
        let parsed: Value = serde_json::from_slice(&bytes)
            .map_err(|e| DispatchError::Malformed(e.to_string()))?;

        let choice = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| DispatchError::Malformed("missing choices[0]".to_string()))?;

        Ok(ChatResponse {
            content: choice
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            finish_reason: choice
                .get("finish_reason")
                .and_then(|v| v.as_str())
                .unwrap_or("stop")
                .to_string(),
            model: parsed.get("model").and_then(|v| v.as_str()).unwrap_or(model_id).to_string(),
            id: parsed.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            created: parsed.get("created").and_then(|v| v.as_i64()).unwrap_or(0),
            system_fingerprint: parsed
                .get("system_fingerprint")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            usage: Usage {
                prompt: parsed.pointer("/usage/prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                completion: parsed.pointer("/usage/completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                total: parsed.pointer("/usage/total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            },
        })
    }

    /// Probe `/v1/models` to learn the backend's self-reported model id: the
    /// server names the model by its mount path, not by the catalog name.
    /// Falls back to the caller-supplied name on any failure.
    async fn probe_openai_model(&self, endpoint: &str, fallback: &str) -> String {
        let url = format!("{}/v1/models", endpoint.trim_end_matches('/'));
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("models probe failed: {}", e);
                return fallback.to_string();
            }
        };

        let bytes = match read_bounded(resp, MODELS_PROBE_LIMIT).await {
            Ok(b) => b,
            Err(e) => {
                debug!("models probe read failed: {}", e);
                return fallback.to_string();
            }
        };

        let parsed: Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(_) => return fallback.to_string(),
        };

        parsed
            .pointer("/data/0/id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string())
    }

    async fn dispatch_ollama(
        &self,
        endpoint: &str,
        model_id: &str,
        messages: Vec<ChatMessage>,
        _options: ChatOptions,
    ) -> DispatchResult<ChatResponse> {
        let body = json!({
            "model": model_id,
            "messages": messages.iter().map(|m| json!({"role": m.role, "content": m.content})).collect::<Vec<_>>(),
            "stream": false,
        });

        let url = format!("{}/api/chat", endpoint.trim_end_matches('/'));
        let resp = self.client.post(&url).json(&body).send().await?;
        let bytes = read_bounded(resp, RESPONSE_READ_LIMIT).await?;
        let parsed: Value = serde_json::from_slice(&bytes)
            .map_err(|e| DispatchError::Malformed(e.to_string()))?;

        Ok(ChatResponse {
            content: parsed
                .pointer("/message/content")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            finish_reason: "stop".to_string(),
            model: parsed.get("model").and_then(|v| v.as_str()).unwrap_or(model_id).to_string(),
            id: String::new(),
            created: parsed.get("created_at").and_then(|v| v.as_i64()).unwrap_or(0),
            system_fingerprint: None,
            usage: Usage {
                prompt: parsed.get("prompt_eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                completion: parsed.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                total: 0,
            },
        })
    }
}

async fn read_bounded(resp: reqwest::Response, limit: usize) -> DispatchResult<Bytes> {
    let mut stream = resp.bytes_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > limit {
            warn!("backend response exceeded {} byte limit, truncating", limit);
            return Err(DispatchError::ResponseTooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_protocol_detected_by_port_marker() {
        assert!("http://host:11434".contains(OLLAMA_MARKER));
        assert!(!"http://host:8080".contains(OLLAMA_MARKER));
    }

    #[tokio::test]
    async fn resolve_model_falls_back_to_raw_input_when_unmatched() {
        let store: Arc<dyn ServiceStore> =
            Arc::new(crate::service::SqliteServiceStore::open_in_memory().unwrap());
        let dispatcher = InferenceDispatcher::new(store);
        let resolved = dispatcher.resolve_model("some-model-id").await.unwrap();
        assert_eq!(resolved, "some-model-id");
    }

    #[tokio::test]
    async fn resolve_model_matches_service_name_case_insensitively() {
        let store: Arc<dyn ServiceStore> =
            Arc::new(crate::service::SqliteServiceStore::open_in_memory().unwrap());
        let mut svc = crate::service::ModelService::new("svc-vllm-llama3", "Llama3", "llama-3-8b-instruct", 1);
        svc.status = ServiceStatus::Running;
        store.save(&svc).await.unwrap();

        let dispatcher = InferenceDispatcher::new(store);
        let resolved = dispatcher.resolve_model("llama3").await.unwrap();
        assert_eq!(resolved, "llama-3-8b-instruct");
    }
}
