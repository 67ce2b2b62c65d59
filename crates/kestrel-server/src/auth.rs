//! API token verification
//!
//! Every `/api/2` request carries `Authorization: Bearer <token>`. The token
//! is resolved to a username by a [`TokenVerifier`]; that username scopes
//! the request (VM folder, network names).

use crate::api::error_response;
use crate::AppState;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Response;
use kestrel_common::config::ServerConfig;
use std::collections::HashMap;
use tracing::debug;

/// Maps an API token to the user it belongs to
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<String>;
}

/// Tokens from the `[server.tokens]` config table
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn from_config(server: &ServerConfig) -> Self {
        Self::new(server.tokens.clone())
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}

/// The authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "Missing bearer token"))?;

        match state.verifier.verify(token) {
            Some(user) => Ok(AuthUser(user)),
            None => {
                debug!(uri = %parts.uri, "Rejected unknown API token");
                Err(error_response(StatusCode::UNAUTHORIZED, "Invalid API token"))
            }
        }
    }
}
