//! Auth Gate: per-operation auth-level resolution with a write-method floor.

use std::collections::{HashMap, HashSet};

use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Auth level assigned to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthLevel {
    Optional,
    Recommended,
    Forced,
}

impl AuthLevel {
    fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "optional" => Some(AuthLevel::Optional),
            "recommended" => Some(AuthLevel::Recommended),
            "forced" => Some(AuthLevel::Forced),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct AuthRejected;

impl IntoResponse for AuthRejected {
    fn into_response(self) -> Response {
        let realm = "inferno";
        (
            StatusCode::UNAUTHORIZED,
            [(
                axum::http::header::WWW_AUTHENTICATE,
                format!("Bearer realm=\"{}\"", realm),
            )],
            Json(json!({
                "success": false,
                "error": {
                    "code": "UNAUTHORIZED",
                    "message": "missing or invalid bearer token"
                }
            })),
        )
            .into_response()
    }
}

/// Resolves the auth level for an operation and decides whether a request passes.
pub struct AuthGate {
    enabled: bool,
    valid_tokens: HashSet<String>,
    operation_levels: HashMap<String, AuthLevel>,
    default_level: AuthLevel,
}

impl AuthGate {
    pub fn new(
        enabled: bool,
        tokens: Vec<String>,
        operation_levels: HashMap<String, String>,
    ) -> Self {
        let operation_levels = operation_levels
            .into_iter()
            .filter_map(|(k, v)| AuthLevel::from_str(&v).map(|lvl| (k, lvl)))
            .collect();

        Self {
            enabled,
            valid_tokens: tokens.into_iter().collect(),
            operation_levels,
            default_level: AuthLevel::Recommended,
        }
    }

    fn is_write_method(method: &Method) -> bool {
        matches!(
            *method,
            Method::POST | Method::PUT | Method::DELETE | Method::PATCH
        )
    }

    fn resolve_level(&self, method: &Method, operation: Option<&str>) -> AuthLevel {
        let base = operation
            .and_then(|op| self.operation_levels.get(op).copied())
            .unwrap_or(self.default_level);

        if Self::is_write_method(method) && base == AuthLevel::Optional {
            AuthLevel::Recommended
        } else {
            base
        }
    }

    fn token_valid(&self, token: Option<&str>) -> bool {
        // An empty valid-token set makes every token invalid: fail-secure.
        match token {
            Some(t) => self.valid_tokens.contains(t),
            None => false,
        }
    }

    /// Decide whether a request is authorized. `token` is the bearer token,
    /// already stripped of the `Bearer ` prefix.
    pub fn check(
        &self,
        method: &Method,
        operation: Option<&str>,
        token: Option<&str>,
    ) -> Result<(), AuthRejected> {
        let level = self.resolve_level(method, operation);

        match level {
            AuthLevel::Optional => match token {
                None => Ok(()),
                Some(_) if self.token_valid(token) => Ok(()),
                Some(_) => Err(AuthRejected),
            },
            AuthLevel::Forced => {
                if self.token_valid(token) {
                    Ok(())
                } else {
                    Err(AuthRejected)
                }
            }
            AuthLevel::Recommended => {
                if !self.enabled {
                    Ok(())
                } else if self.token_valid(token) {
                    Ok(())
                } else {
                    Err(AuthRejected)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(enabled: bool, levels: &[(&str, &str)]) -> AuthGate {
        AuthGate::new(
            enabled,
            vec!["secret".to_string()],
            levels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn optional_passes_without_token() {
        let g = gate(true, &[("model.list", "optional")]);
        assert!(g.check(&Method::GET, Some("model.list"), None).is_ok());
    }

    #[test]
    fn optional_with_invalid_token_rejected() {
        let g = gate(true, &[("model.list", "optional")]);
        assert!(g
            .check(&Method::GET, Some("model.list"), Some("nope"))
            .is_err());
    }

    #[test]
    fn write_method_floors_optional_to_recommended() {
        // POST on an Optional-level operation with auth enabled and no token: rejected.
        let g = gate(true, &[("model.list", "optional")]);
        assert!(g
            .check(&Method::POST, Some("model.list"), None)
            .is_err());
    }

    #[test]
    fn forced_rejects_even_when_globally_disabled() {
        let g = gate(false, &[("service.delete", "forced")]);
        assert!(g
            .check(&Method::DELETE, Some("service.delete"), None)
            .is_err());
    }

    #[test]
    fn recommended_passes_when_auth_globally_disabled() {
        let g = gate(false, &[]);
        assert!(g.check(&Method::GET, Some("service.get"), None).is_ok());
    }

    #[test]
    fn recommended_requires_token_when_enabled() {
        let g = gate(true, &[]);
        assert!(g.check(&Method::GET, Some("service.get"), None).is_err());
        assert!(g
            .check(&Method::GET, Some("service.get"), Some("secret"))
            .is_ok());
    }

    #[test]
    fn empty_token_set_is_fail_secure() {
        let g = AuthGate::new(true, vec![], HashMap::new());
        assert!(g
            .check(&Method::GET, None, Some("anything"))
            .is_err());
    }
}
