//! Bearer key gate for administrative routes

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::AppState;

/// Extractor that admits the request when no key is configured or when
/// `Authorization: Bearer <key>` matches.
pub struct RequireAuth;

#[async_trait]
impl FromRequestParts<AppState> for RequireAuth {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.api_key.as_deref() else {
            return Ok(RequireAuth);
        };

        let presented = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim);

        match presented {
            Some(key) if key == expected => Ok(RequireAuth),
            Some(_) => {
                warn!(path = %parts.uri.path(), "Rejected request with wrong API key");
                Err((StatusCode::UNAUTHORIZED, "invalid API key").into_response())
            }
            None => Err((StatusCode::UNAUTHORIZED, "missing required authentication header").into_response()),
        }
    }
}
