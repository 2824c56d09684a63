//! In-memory stores
//!
//! Records live in `DashMap`s keyed by id. Every mutation runs under the
//! entry's write guard, so operations on one entity are linearized while
//! different entities only share a shard lock for the duration of a copy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use super::{DocumentVersionStore, SignerStore};
use crate::error::{EngineError, Result};
use crate::model::{Document, NewVersion, Signer, SignerInfo, SignerName, SignerState};

#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<String, Document>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, document_id: &str, f: F) -> Result<Document>
    where
        F: FnOnce(&mut Document) -> Result<()>,
    {
        let mut entry = self
            .documents
            .get_mut(document_id)
            .ok_or_else(|| EngineError::not_found("document", document_id))?;
        f(entry.value_mut())?;
        Ok(entry.clone())
    }
}

#[async_trait]
impl DocumentVersionStore for MemoryDocumentStore {
    async fn create(&self, file_name: &str, initial_version: NewVersion) -> Result<Document> {
        let file_name = validate_title(file_name)?;
        initial_version.validate()?;

        let document = Document {
            id: uuid::Uuid::new_v4().to_string(),
            file_name,
            archived_date: None,
            versions: vec![initial_version.into_version()],
        };
        self.documents.insert(document.id.clone(), document.clone());

        info!(document_id = %document.id, file_name = %document.file_name, "Created document");
        Ok(document)
    }

    async fn rename(&self, document_id: &str, new_title: &str) -> Result<Document> {
        let title = validate_title(new_title)?;
        self.update(document_id, |doc| {
            doc.file_name = title;
            Ok(())
        })
    }

    async fn add_version(&self, document_id: &str, version: NewVersion) -> Result<Document> {
        version.validate()?;
        let document = self.update(document_id, |doc| {
            if doc.is_archived() {
                return Err(EngineError::NotFound(format!(
                    "document {} is archived",
                    document_id
                )));
            }
            doc.versions.push(version.into_version());
            Ok(())
        })?;
        debug!(document_id, versions = document.versions.len(), "Appended version");
        Ok(document)
    }

    async fn archive(&self, document_id: &str) -> Result<Document> {
        self.update(document_id, |doc| {
            if doc.is_archived() {
                return Err(EngineError::InvalidState(format!(
                    "document {} is already archived",
                    document_id
                )));
            }
            doc.archived_date = Some(Utc::now());
            Ok(())
        })
    }

    async fn unarchive(&self, document_id: &str) -> Result<Document> {
        self.update(document_id, |doc| {
            if !doc.is_archived() {
                return Err(EngineError::InvalidState(format!(
                    "document {} is not archived",
                    document_id
                )));
            }
            doc.archived_date = None;
            Ok(())
        })
    }

    async fn list(&self, archived: bool) -> Result<Vec<Document>> {
        let mut documents: Vec<Document> = self
            .documents
            .iter()
            .filter(|d| d.is_archived() == archived)
            .map(|d| d.clone())
            .collect();
        documents.sort_by(|a, b| created_at(a).cmp(&created_at(b)).then_with(|| a.id.cmp(&b.id)));
        Ok(documents)
    }

    async fn get_by_id(&self, document_id: &str) -> Result<Document> {
        self.documents
            .get(document_id)
            .map(|d| d.clone())
            .ok_or_else(|| EngineError::not_found("document", document_id))
    }
}

fn created_at(doc: &Document) -> Option<DateTime<Utc>> {
    doc.versions.first().map(|v| v.add_date)
}

pub(crate) fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(EngineError::Validation("document title is required".into()));
    }
    Ok(title.to_string())
}

#[derive(Default)]
pub struct MemorySignerStore {
    signers: DashMap<String, Signer>,
}

impl MemorySignerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, signer_id: &str, f: F) -> Result<Signer>
    where
        F: FnOnce(&mut Signer) -> Result<()>,
    {
        let mut entry = self
            .signers
            .get_mut(signer_id)
            .ok_or_else(|| EngineError::not_found("signer", signer_id))?;
        f(entry.value_mut())?;
        Ok(entry.clone())
    }

    fn collect<P>(&self, predicate: P) -> Vec<Signer>
    where
        P: Fn(&Signer) -> bool,
    {
        let mut signers: Vec<Signer> = self
            .signers
            .iter()
            .filter(|s| predicate(s.value()))
            .map(|s| s.clone())
            .collect();
        signers.sort_by(|a, b| a.created_date.cmp(&b.created_date).then_with(|| a.id.cmp(&b.id)));
        signers
    }
}

#[async_trait]
impl SignerStore for MemorySignerStore {
    async fn attach(&self, document_id: &str, info: SignerInfo) -> Result<Signer> {
        info.validate()?;
        let signer = info.into_signer(document_id);
        self.signers.insert(signer.id.clone(), signer.clone());

        info!(signer_id = %signer.id, document_id, "Attached signer");
        Ok(signer)
    }

    async fn get(&self, signer_id: &str) -> Result<Signer> {
        self.signers
            .get(signer_id)
            .map(|s| s.clone())
            .ok_or_else(|| EngineError::not_found("signer", signer_id))
    }

    async fn mark_signed(
        &self,
        signer_id: &str,
        signature_image: Vec<u8>,
        signed_date: DateTime<Utc>,
    ) -> Result<Signer> {
        self.update(signer_id, |s| s.sign(signature_image, signed_date))
    }

    async fn clear_signature(&self, signer_id: &str) -> Result<Signer> {
        self.update(signer_id, |s| s.clear_signature())
    }

    async fn archive(&self, signer_id: &str) -> Result<Signer> {
        self.update(signer_id, |s| s.archive())
    }

    async fn unarchive(&self, signer_id: &str) -> Result<Signer> {
        self.update(signer_id, |s| s.unarchive())
    }

    async fn hard_delete(&self, signer_id: &str) -> Result<()> {
        let removed = self
            .signers
            .remove_if(signer_id, |_, s| s.state == SignerState::Archived);
        if removed.is_some() {
            info!(signer_id, "Deleted archived signer");
            return Ok(());
        }
        // Not removed: report why
        self.get(signer_id).await?.ensure_deletable()?;
        Err(EngineError::not_found("signer", signer_id))
    }

    async fn list_by_document(&self, document_id: &str, archived: bool) -> Result<Vec<Signer>> {
        Ok(self.collect(|s| s.document_id == document_id && s.is_archived() == archived))
    }

    async fn list_all(&self) -> Result<Vec<Signer>> {
        Ok(self.collect(|_| true))
    }

    async fn list_archived(&self) -> Result<Vec<Signer>> {
        Ok(self.collect(|s| s.is_archived()))
    }

    async fn get_by_email(&self, email: &str) -> Result<SignerName> {
        let email = email.trim().to_lowercase();
        self.collect(|s| s.email == email)
            .pop()
            .map(|s| SignerName {
                display_name: s.display_name,
            })
            .ok_or_else(|| EngineError::NotFound("no signer with this email".into()))
    }
}
