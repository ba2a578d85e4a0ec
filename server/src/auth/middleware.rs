use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::jwt::JwtVerifier;

/// JWT claims for an authenticated user.
/// Implements axum's FromRequestParts for use as an extractor on REST routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Stable user identity
    #[serde(default)]
    pub user_id: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = token_from_cookie(parts)
            .or_else(|| token_from_bearer(parts))
            .ok_or(StatusCode::UNAUTHORIZED)?;

        // Verifier is placed in request extensions by the router middleware
        let verifier = parts
            .extensions
            .get::<AuthVerifier>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

        verifier
            .0
            .decode_claims(&token)
            .map_err(|_| StatusCode::UNAUTHORIZED)
    }
}

/// The `jwt` cookie wins over the Authorization header.
fn token_from_cookie(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == "jwt" && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn token_from_bearer(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Verifier stored in request extensions for the Claims extractor
#[derive(Clone)]
pub struct AuthVerifier(pub Arc<JwtVerifier>);
