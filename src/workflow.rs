//! Signing workflow
//!
//! Ties the document store, the signer store, the token cache and the
//! compositor together. Token operations take the pair lock first and read
//! signer state under it, so a signer's state cannot change between the
//! check and the token mutation.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::compositor::SignatureCompositor;
use crate::error::{EngineError, Result};
use crate::model::{
    Document, NewVersion, SignedArtifact, Signer, SignerInfo, SignerName, SignerState,
    SigningContext, SigningToken,
};
use crate::store::{DocumentVersionStore, SignerStore};
use crate::tokens::{TokenCache, TokenCacheStats, TokenKey};

#[derive(Clone)]
pub struct SigningWorkflow {
    documents: Arc<dyn DocumentVersionStore>,
    signers: Arc<dyn SignerStore>,
    tokens: Arc<TokenCache>,
    compositor: Arc<SignatureCompositor>,
}

impl SigningWorkflow {
    pub fn new(
        documents: Arc<dyn DocumentVersionStore>,
        signers: Arc<dyn SignerStore>,
        tokens: Arc<TokenCache>,
        compositor: Arc<SignatureCompositor>,
    ) -> Self {
        Self {
            documents,
            signers,
            tokens,
            compositor,
        }
    }

    // === Documents ===

    pub async fn create_document(&self, file_name: &str, initial_version: NewVersion) -> Result<Document> {
        self.documents.create(file_name, initial_version).await
    }

    pub async fn rename_document(&self, document_id: &str, new_title: &str) -> Result<Document> {
        self.documents.rename(document_id, new_title).await
    }

    pub async fn add_version(&self, document_id: &str, version: NewVersion) -> Result<Document> {
        self.documents.add_version(document_id, version).await
    }

    pub async fn archive_document(&self, document_id: &str) -> Result<Document> {
        self.documents.archive(document_id).await
    }

    pub async fn unarchive_document(&self, document_id: &str) -> Result<Document> {
        self.documents.unarchive(document_id).await
    }

    pub async fn list_documents(&self, archived: bool) -> Result<Vec<Document>> {
        self.documents.list(archived).await
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Document> {
        self.documents.get_by_id(document_id).await
    }

    async fn active_document(&self, document_id: &str) -> Result<Document> {
        let document = self.documents.get_by_id(document_id).await?;
        if document.is_archived() {
            return Err(EngineError::NotFound(format!("document {} is archived", document_id)));
        }
        Ok(document)
    }

    // === Signers ===

    /// Attach a signer to an active document
    pub async fn attach_signer(&self, document_id: &str, info: SignerInfo) -> Result<Signer> {
        self.active_document(document_id).await?;
        self.signers.attach(document_id, info).await
    }

    pub async fn get_signer(&self, signer_id: &str) -> Result<Signer> {
        self.signers.get(signer_id).await
    }

    /// Archive a signer and revoke its outstanding token
    pub async fn archive_signer(&self, signer_id: &str) -> Result<Signer> {
        let current = self.signers.get(signer_id).await?;
        let mut lock = self
            .tokens
            .lock_pair(&TokenKey::new(signer_id, current.document_id.as_str()))
            .await;
        let archived = self.signers.archive(signer_id).await?;
        lock.revoke_unused();
        Ok(archived)
    }

    pub async fn unarchive_signer(&self, signer_id: &str) -> Result<Signer> {
        self.signers.unarchive(signer_id).await
    }

    /// Hard-delete an archived signer along with every token it was issued
    pub async fn delete_signer(&self, signer_id: &str) -> Result<()> {
        let signer = self.signers.get(signer_id).await?;
        self.signers.hard_delete(signer_id).await?;
        self.tokens
            .forget_pair(&TokenKey::new(signer_id, signer.document_id.as_str()))
            .await;
        Ok(())
    }

    pub async fn list_signers(&self, document_id: &str, archived: bool) -> Result<Vec<Signer>> {
        self.signers.list_by_document(document_id, archived).await
    }

    pub async fn list_all_signers(&self) -> Result<Vec<Signer>> {
        self.signers.list_all().await
    }

    pub async fn list_archived_signers(&self) -> Result<Vec<Signer>> {
        self.signers.list_archived().await
    }

    pub async fn signer_name_by_email(&self, email: &str) -> Result<SignerName> {
        self.signers.get_by_email(email).await
    }

    // === Tokens ===

    /// Token for a (signer, document) pair. Returns the outstanding one when it exists.
    pub async fn issue_token(&self, signer_id: &str, document_id: &str) -> Result<SigningToken> {
        self.active_document(document_id).await?;

        let key = TokenKey::new(signer_id, document_id);
        let mut lock = self.tokens.lock_pair(&key).await;

        let signer = self.signer_on_document(signer_id, document_id).await?;
        if signer.state != SignerState::Pending {
            return Err(EngineError::InvalidState(format!(
                "signer {} is {} and cannot be issued a signing token",
                signer.id,
                signer.state.as_str()
            )));
        }

        Ok(lock.issue())
    }

    /// Resolve the signer by email among the document's active signers, then issue.
    pub async fn issue_token_for_email(&self, email: &str, document_id: &str) -> Result<SigningToken> {
        let email = email.trim().to_lowercase();
        let candidates: Vec<Signer> = self
            .signers
            .list_by_document(document_id, false)
            .await?
            .into_iter()
            .filter(|s| s.email == email)
            .collect();

        // Several signers may share an email; the one still expected to sign wins
        let signer = candidates
            .iter()
            .find(|s| s.state == SignerState::Pending)
            .or_else(|| candidates.first())
            .ok_or_else(|| {
                EngineError::NotFound(format!("no signer with this email on document {}", document_id))
            })?;

        self.issue_token(&signer.id, document_id).await
    }

    /// Redeem a token with a raw signature bitmap.
    ///
    /// The pair lock is held across the whole operation. Once compositing
    /// succeeds, `mark_signed` and `mark_used` run in a spawned task that owns
    /// the lock, so dropping the request cannot leave a Signed signer behind
    /// an unused token. A failure before that point leaves the token usable.
    pub async fn redeem(&self, token: &str, signature_bitmap: Vec<u8>) -> Result<SignedArtifact> {
        let mut lock = self.tokens.lock_token(token).await?;
        lock.ensure_unused(token)?;
        let TokenKey { signer_id, document_id } = lock.key().clone();

        let signer = self.signer_on_document(&signer_id, &document_id).await?;
        if signer.state != SignerState::Pending {
            return Err(EngineError::InvalidState(format!(
                "signer {} is {} and cannot sign",
                signer.id,
                signer.state.as_str()
            )));
        }
        let document = self.active_document(&document_id).await?;

        let signed_date = Utc::now();
        let compositor = self.compositor.clone();
        let display_name = signer.display_name.clone();
        let image = tokio::task::spawn_blocking(move || {
            compositor.compose(&signature_bitmap, &display_name, signed_date)
        })
        .await
        .map_err(|e| EngineError::ImageProcessing(format!("compositing task failed: {}", e)))?
        .map_err(|e| {
            warn!(signer_id = %signer_id, error = %e, "Signature compositing failed");
            e
        })?;

        let signers = self.signers.clone();
        let commit_signer = signer_id.clone();
        let commit_image = image.clone();
        let commit_token = token.to_string();
        tokio::spawn(async move {
            signers
                .mark_signed(&commit_signer, commit_image, signed_date)
                .await?;
            lock.mark_used(&commit_token)
        })
        .await
        .map_err(|e| EngineError::Storage(format!("signature commit task failed: {}", e)))??;

        info!(
            signer_id = %signer_id,
            document_id = %document_id,
            bytes = image.len(),
            "Signature recorded"
        );
        self.tokens.maybe_purge();

        Ok(SignedArtifact {
            image,
            document_name: document.file_name,
        })
    }

    /// Delete an unused token. Only its own signer may revoke it.
    pub async fn revoke_by_token(&self, token: &str, signer_id: &str) -> Result<()> {
        let mut lock = self.tokens.lock_token(token).await?;
        if lock.key().signer_id != signer_id {
            debug!(signer_id, "Revocation attempted for another signer's token");
            return Err(EngineError::TokenNotFound);
        }
        lock.revoke(token)
    }

    /// Clear the signatures collected on a document for the person behind `signer_id`.
    ///
    /// Every Signed signer of the document sharing that signer's email goes
    /// back to Pending. Pending signers and outstanding tokens are left alone.
    pub async fn revoke_all_signed_for_document(
        &self,
        document_id: &str,
        signer_id: &str,
    ) -> Result<Vec<Signer>> {
        let owner = self.signer_on_document(signer_id, document_id).await?;
        let signed: Vec<Signer> = self
            .signers
            .list_by_document(document_id, false)
            .await?
            .into_iter()
            .filter(|s| s.email == owner.email && s.state == SignerState::Signed)
            .collect();

        let mut cleared = Vec::with_capacity(signed.len());
        for signer in signed {
            // Serialize with a redeem or issue in flight for this pair
            let _lock = self
                .tokens
                .lock_pair(&TokenKey::new(signer.id.as_str(), document_id))
                .await;
            match self.signers.clear_signature(&signer.id).await {
                Ok(signer) => cleared.push(signer),
                // Archived or already cleared since the listing
                Err(EngineError::InvalidState(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        info!(document_id, signer_id, cleared = cleared.len(), "Revoked signatures");
        Ok(cleared)
    }

    /// What a signing page needs for a token that can still be redeemed
    ///
    /// Applies the same checks as `redeem`: unused token, Pending signer on
    /// the token's document, active document.
    pub async fn lookup_signing_context(&self, token: &str) -> Result<SigningContext> {
        let lock = self.tokens.lock_token(token).await?;
        lock.ensure_unused(token)?;
        let TokenKey { signer_id, document_id } = lock.key().clone();

        let signer = self.signer_on_document(&signer_id, &document_id).await?;
        if signer.state != SignerState::Pending {
            return Err(EngineError::InvalidState(format!(
                "signer {} is {} and cannot sign",
                signer.id,
                signer.state.as_str()
            )));
        }
        let document = self.active_document(&document_id).await?;
        drop(lock);

        Ok(SigningContext {
            document_id,
            document_name: document.file_name,
            signer_id,
            display_name: signer.display_name,
        })
    }

    /// The composited signature stored for a signer
    pub async fn signed_artifact(&self, signer_id: &str) -> Result<SignedArtifact> {
        let signer = self.signers.get(signer_id).await?;
        let image = signer
            .signature_image
            .ok_or_else(|| EngineError::NotFound(format!("signer {} has not signed", signer_id)))?;
        let document = self.documents.get_by_id(&signer.document_id).await?;
        Ok(SignedArtifact {
            image,
            document_name: document.file_name,
        })
    }

    pub fn token_stats(&self) -> TokenCacheStats {
        self.tokens.stats()
    }

    pub fn purge_used_tokens(&self) -> usize {
        self.tokens.purge_used()
    }

    async fn signer_on_document(&self, signer_id: &str, document_id: &str) -> Result<Signer> {
        let signer = self.signers.get(signer_id).await?;
        if signer.document_id != document_id {
            return Err(EngineError::NotFound(format!(
                "signer {} on document {}",
                signer_id, document_id
            )));
        }
        Ok(signer)
    }
}
