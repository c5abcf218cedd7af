//! HTTP gateway: the Command/Query surface and the inference chat endpoint,
//! behind auth, rate-limit, CORS, and panic-catch middleware.

mod handlers;
mod middleware;

use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    routing::post,
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::AuthGate;
use crate::command::CommandExecutor;
use crate::config::Configuration;
use crate::dispatch::InferenceDispatcher;
use crate::ratelimit::RateLimiter;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth_gate: Arc<AuthGate>,
    pub rate_limiter: Arc<RateLimiter>,
    pub executor: Arc<CommandExecutor>,
    pub dispatcher: Arc<InferenceDispatcher>,
    pub config: Arc<Configuration>,
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);

    let protected = Router::new()
        .route("/api/v2/execute", post(handlers::command::execute))
        .route("/v1/chat/completions", post(handlers::chat::chat_completions))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit,
        ));

    protected
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn panic_response(_err: Box<dyn std::any::Any + Send>) -> axum::response::Response {
    use axum::response::IntoResponse;
    (
        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(serde_json::json!({
            "success": false,
            "error": {"code": "INTERNAL_ERROR", "message": "internal server error"}
        })),
    )
        .into_response()
}

/// Build a CORS layer supporting exact-origin, `*`, and `*.domain.tld`
/// subdomain-wildcard matching, per the configured allow-list.
fn build_cors_layer(config: &Configuration) -> CorsLayer {
    let origins = config.ingress.cors_allowed_origins.clone();
    let allow_credentials = config.ingress.cors_allow_credentials;
    let max_age = config.ingress.cors_max_age;

    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin_matches(&origins, origin)
        })
    };

    let mut layer = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::PATCH])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static("x-unit"),
        ])
        .max_age(std::time::Duration::from_secs(max_age));

    if allow_credentials {
        layer = layer.allow_credentials(true);
    }

    layer
}

fn origin_matches(allowed: &[String], origin: &HeaderValue) -> bool {
    let Ok(origin) = origin.to_str() else { return false };
    let host = origin
        .split("://")
        .nth(1)
        .unwrap_or(origin);

    allowed.iter().any(|pattern| {
        if pattern == origin {
            return true;
        }
        if let Some(suffix) = pattern.strip_prefix("*.") {
            return host.ends_with(suffix) && host.len() > suffix.len();
        }
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_origin_matches() {
        let allowed = vec!["https://app.example.com".to_string()];
        let origin = HeaderValue::from_static("https://app.example.com");
        assert!(origin_matches(&allowed, &origin));
    }

    #[test]
    fn subdomain_wildcard_matches_matching_suffix() {
        let allowed = vec!["*.example.com".to_string()];
        let origin = HeaderValue::from_static("https://app.example.com");
        assert!(origin_matches(&allowed, &origin));
    }

    #[test]
    fn subdomain_wildcard_rejects_unrelated_domain() {
        let allowed = vec!["*.example.com".to_string()];
        let origin = HeaderValue::from_static("https://evil.com");
        assert!(!origin_matches(&allowed, &origin));
    }
}
