//! Document routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;

use super::{AppState, ArchivedQuery};
use crate::error::Result;
use crate::model::{Document, NewVersion};

/// GET /documents[?archived]
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ArchivedQuery>,
) -> Result<Json<Vec<Document>>> {
    Ok(Json(state.workflow.list_documents(query.archived()).await?))
}

/// GET /documents/:id
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Document>> {
    Ok(Json(state.workflow.get_document(&id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentRequest {
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub version: NewVersion,
}

/// POST /documents
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateDocumentRequest>,
) -> Result<impl IntoResponse> {
    let document = state.workflow.create_document(&req.title, req.version).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    #[serde(default)]
    pub title: String,
}

/// PUT /documents/:id
pub async fn rename(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<Document>> {
    Ok(Json(state.workflow.rename_document(&id, &req.title).await?))
}

/// POST /documents/:id - append a version
pub async fn add_version(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(version): Json<NewVersion>,
) -> Result<Json<Document>> {
    Ok(Json(state.workflow.add_version(&id, version).await?))
}

/// DELETE /documents/:id - soft delete
pub async fn archive(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Document>> {
    Ok(Json(state.workflow.archive_document(&id).await?))
}

/// PUT /documents/:id/unarchive
pub async fn unarchive(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Document>> {
    Ok(Json(state.workflow.unarchive_document(&id).await?))
}
