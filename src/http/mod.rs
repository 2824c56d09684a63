//! HTTP API
//!
//! Thin axum layer over [`SigningWorkflow`]. Handlers return
//! `Result<_, EngineError>`; the error's `IntoResponse` impl picks the
//! status code and a plain-text message.

pub mod auth;
pub mod documents;
pub mod response;
pub mod users;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::tokens::TokenCacheStats;
use crate::workflow::SigningWorkflow;

/// State shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub workflow: SigningWorkflow,
    /// `None` leaves administrative routes open
    pub api_key: Option<Arc<str>>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(workflow: SigningWorkflow, api_key: Option<&str>, max_body_bytes: usize) -> Self {
        Self {
            workflow,
            api_key: api_key.map(Arc::from),
            max_body_bytes,
        }
    }
}

/// `?archived` list filter. A bare flag or any value other than `false` selects archived entries.
#[derive(Debug, Default, Deserialize)]
pub struct ArchivedQuery {
    #[serde(default)]
    pub archived: Option<String>,
}

impl ArchivedQuery {
    pub fn archived(&self) -> bool {
        self.archived
            .as_deref()
            .is_some_and(|v| !v.eq_ignore_ascii_case("false"))
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let max_body = state.max_body_bytes;

    Router::new()
        // Documents
        .route("/documents", get(documents::list).post(documents::create))
        .route(
            "/documents/:id",
            get(documents::get)
                .put(documents::rename)
                .post(documents::add_version)
                .delete(documents::archive),
        )
        .route("/documents/:id/unarchive", put(documents::unarchive))
        // Signers
        .route("/users", get(users::list_or_lookup).post(users::attach))
        .route("/users/archived", get(users::list_archived))
        .route("/users/generateSigningToken", post(users::generate_signing_token))
        .route("/users/signingData/:token", get(users::signing_data))
        .route("/users/sign/:token", post(users::sign))
        .route("/users/signedDocument/:id", get(users::signed_document))
        .route("/users/:id", get(users::list_for_document).delete(users::archive))
        .route("/users/:id/unarchive", put(users::unarchive))
        .route("/users/:id/archived", delete(users::delete_archived))
        .route(
            "/users/:id/deleteAllSignatures/:doc_id",
            delete(users::delete_all_signatures),
        )
        .route(
            "/users/:id/deleteSignaturesToken/:token",
            delete(users::delete_signature_token),
        )
        // Health check
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub tokens: TokenCacheStats,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        tokens: state.workflow.token_stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag(value: Option<&str>) -> bool {
        ArchivedQuery {
            archived: value.map(str::to_string),
        }
        .archived()
    }

    #[test]
    fn test_archived_flag_presence() {
        assert!(!flag(None));
        assert!(flag(Some("")));
        assert!(flag(Some("true")));
        assert!(flag(Some("1")));
        assert!(!flag(Some("false")));
        assert!(!flag(Some("FALSE")));
    }
}
