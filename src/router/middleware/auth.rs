//! Authentication middleware: resolves the operation from `X-Unit`, then
//! defers the accept/reject decision to the Auth Gate.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth::AuthRejected;

use super::super::AppState;

pub async fn require_auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let operation = request
        .headers()
        .get("X-Unit")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match state
        .auth_gate
        .check(request.method(), operation.as_deref(), token)
    {
        Ok(()) => next.run(request).await,
        Err(rejected) => rejected.into_response(),
    }
}
