//! Signer routes
//!
//! Handlers taking [`RequireAuth`] are administrative. The signing page
//! routes (`signingData`, `sign`) and the per-document signer listing are
//! reachable with a token or a document id alone.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::{debug, info};

use super::auth::RequireAuth;
use super::response::{document_download, Disposition};
use super::{AppState, ArchivedQuery};
use crate::error::{EngineError, Result};
use crate::model::{Signer, SignerInfo, SigningContext};

/// Multipart field carrying the signature bitmap
const SIGNATURE_FIELD: &str = "blob";

#[derive(Debug, Default, Deserialize)]
pub struct UsersQuery {
    pub email: Option<String>,
}

/// GET /users[?email=] - every signer, or the display name behind an email
pub async fn list_or_lookup(
    _auth: RequireAuth,
    State(state): State<AppState>,
    Query(query): Query<UsersQuery>,
) -> Result<Response> {
    match query.email {
        Some(email) => Ok(Json(state.workflow.signer_name_by_email(&email).await?).into_response()),
        None => Ok(Json(state.workflow.list_all_signers().await?).into_response()),
    }
}

/// GET /users/archived
pub async fn list_archived(_auth: RequireAuth, State(state): State<AppState>) -> Result<Json<Vec<Signer>>> {
    Ok(Json(state.workflow.list_archived_signers().await?))
}

/// GET /users/:documentId[?archived]
pub async fn list_for_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Query(query): Query<ArchivedQuery>,
) -> Result<Json<Vec<Signer>>> {
    Ok(Json(state.workflow.list_signers(&document_id, query.archived()).await?))
}

/// GET /users/signingData/:token
pub async fn signing_data(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<SigningContext>> {
    Ok(Json(state.workflow.lookup_signing_context(&token).await?))
}

/// Email may be sent as `email` or `identifier`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRequest {
    pub document_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, alias = "identifier")]
    pub email: String,
}

/// POST /users
pub async fn attach(
    _auth: RequireAuth,
    State(state): State<AppState>,
    Json(req): Json<AttachRequest>,
) -> Result<impl IntoResponse> {
    let signer = state
        .workflow
        .attach_signer(&req.document_id, SignerInfo::new(req.display_name, req.email))
        .await?;
    Ok((StatusCode::CREATED, Json(signer)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTokenRequest {
    pub document_id: String,
    #[serde(default, alias = "identifier")]
    pub email: String,
}

/// POST /users/generateSigningToken - plain-text token
pub async fn generate_signing_token(
    _auth: RequireAuth,
    State(state): State<AppState>,
    Json(req): Json<GenerateTokenRequest>,
) -> Result<String> {
    if req.email.trim().is_empty() {
        return Err(EngineError::Validation("email or identifier is required".into()));
    }
    let token = state
        .workflow
        .issue_token_for_email(&req.email, &req.document_id)
        .await?;
    Ok(token.token)
}

/// POST /users/sign/:token - multipart with the drawn signature in `blob`
pub async fn sign(
    State(state): State<AppState>,
    Path(token): Path<String>,
    multipart: Multipart,
) -> Result<Response> {
    let bitmap = read_signature(multipart).await?;
    let artifact = state.workflow.redeem(&token, bitmap).await?;
    Ok(document_download(artifact.image, &artifact.document_name, Disposition::Attachment))
}

async fn read_signature(mut multipart: Multipart) -> Result<Vec<u8>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| EngineError::Validation(format!("malformed multipart body: {}", e)))?
    {
        if field.name() == Some(SIGNATURE_FIELD) {
            let data = field
                .bytes()
                .await
                .map_err(|e| EngineError::Validation(format!("unreadable signature upload: {}", e)))?;
            debug!(bytes = data.len(), "Received signature bitmap");
            return Ok(data.to_vec());
        }
    }
    Err(EngineError::Validation(format!(
        "multipart field '{}' is required",
        SIGNATURE_FIELD
    )))
}

/// GET /users/signedDocument/:id
pub async fn signed_document(
    _auth: RequireAuth,
    State(state): State<AppState>,
    Path(signer_id): Path<String>,
) -> Result<Response> {
    let artifact = state.workflow.signed_artifact(&signer_id).await?;
    Ok(document_download(artifact.image, &artifact.document_name, Disposition::Inline))
}

/// PUT /users/:id/unarchive
pub async fn unarchive(
    _auth: RequireAuth,
    State(state): State<AppState>,
    Path(signer_id): Path<String>,
) -> Result<Json<Signer>> {
    Ok(Json(state.workflow.unarchive_signer(&signer_id).await?))
}

/// DELETE /users/:id - archive
pub async fn archive(
    _auth: RequireAuth,
    State(state): State<AppState>,
    Path(signer_id): Path<String>,
) -> Result<Json<Signer>> {
    Ok(Json(state.workflow.archive_signer(&signer_id).await?))
}

/// DELETE /users/:id/archived - permanent removal
pub async fn delete_archived(
    _auth: RequireAuth,
    State(state): State<AppState>,
    Path(signer_id): Path<String>,
) -> Result<StatusCode> {
    state.workflow.delete_signer(&signer_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /users/:userId/deleteAllSignatures/:docId
pub async fn delete_all_signatures(
    _auth: RequireAuth,
    State(state): State<AppState>,
    Path((signer_id, document_id)): Path<(String, String)>,
) -> Result<Json<Vec<Signer>>> {
    let cleared = state
        .workflow
        .revoke_all_signed_for_document(&document_id, &signer_id)
        .await?;
    Ok(Json(cleared))
}

/// DELETE /users/:userId/deleteSignaturesToken/:token
pub async fn delete_signature_token(
    _auth: RequireAuth,
    State(state): State<AppState>,
    Path((signer_id, token)): Path<(String, String)>,
) -> Result<StatusCode> {
    state.workflow.revoke_by_token(&token, &signer_id).await?;
    info!(signer_id = %signer_id, "Signing token revoked over HTTP");
    Ok(StatusCode::NO_CONTENT)
}
