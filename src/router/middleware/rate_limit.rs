//! Rate-limit middleware: keys the token bucket by client address.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;

use super::super::AppState;

pub async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = addr.ip().to_string();

    match state.rate_limiter.allow(&key) {
        Ok(true) => next.run(request).await,
        Ok(false) => too_many_requests(),
        Err(_) => next.run(request).await,
    }
}

fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(axum::http::header::RETRY_AFTER, "60")],
        Json(json!({
            "success": false,
            "error": {
                "code": "RATE_LIMITED",
                "message": "too many requests"
            }
        })),
    )
        .into_response()
}
