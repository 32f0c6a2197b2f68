//! HTTP Basic auth for the merchant-facing API.
//!
//! Fixed username `spayd` with a generated password, in the phoenixd style.
//! The provider webhook endpoint is excluded from this middleware; it is
//! authenticated by its own HMAC signature instead.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use tracing::warn;

#[derive(Clone)]
pub struct ApiAuth {
    username: String,
    password: String,
    enabled: bool,
}

impl ApiAuth {
    pub fn new(password: Option<String>) -> Self {
        Self {
            username: "spayd".to_string(),
            password: password.clone().unwrap_or_default(),
            enabled: password.is_some(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn verify(&self, auth_header: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let Some(credentials) = auth_header.strip_prefix("Basic ") else {
            return false;
        };

        match base64::engine::general_purpose::STANDARD.decode(credentials) {
            Ok(decoded) => {
                let decoded_str = String::from_utf8_lossy(&decoded);
                decoded_str == format!("{}:{}", self.username, self.password)
            }
            Err(_) => false,
        }
    }
}

pub async fn api_auth_middleware(
    auth: Arc<ApiAuth>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !auth.is_enabled() {
        return Ok(next.run(request).await);
    }

    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if auth.verify(auth_header) {
        Ok(next.run(request).await)
    } else {
        warn!(
            path = %request.uri().path(),
            "Rejected request with missing or invalid credentials"
        );
        Err(StatusCode::UNAUTHORIZED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_for(username: &str, password: &str) -> String {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
        format!("Basic {encoded}")
    }

    #[test]
    fn disabled_auth_accepts_anything() {
        let auth = ApiAuth::new(None);
        assert!(!auth.is_enabled());
        assert!(auth.verify(""));
        assert!(auth.verify("Basic garbage"));
    }

    #[test]
    fn verifies_correct_credentials() {
        let auth = ApiAuth::new(Some("hunter2".to_string()));
        assert!(auth.verify(&header_for("spayd", "hunter2")));
        assert!(!auth.verify(&header_for("spayd", "wrong")));
        assert!(!auth.verify(&header_for("other", "hunter2")));
        assert!(!auth.verify("Bearer token"));
        assert!(!auth.verify("Basic not-base64!"));
    }
}
