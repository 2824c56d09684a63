//! Document and signer stores
//!
//! Each store owns its records exclusively and is reached only through its
//! trait. Two backends are provided:
//!
//! - [`memory`] - `DashMap` keyed per entity, state lives for the process
//! - [`sqlite`] - a single SQLite file (WAL), one connection behind a mutex
//!
//! Mutations of one entity are linearized by both backends: an `archive`
//! can never interleave with an in-flight `add_version` on the same document.

pub mod memory;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Document, NewVersion, Signer, SignerInfo, SignerName};

pub use memory::{MemoryDocumentStore, MemorySignerStore};
pub use sqlite::SqliteStore;

#[async_trait]
pub trait DocumentVersionStore: Send + Sync {
    /// Create a document with its first version
    async fn create(&self, file_name: &str, initial_version: NewVersion) -> Result<Document>;

    /// Change the title. The only mutable document field.
    async fn rename(&self, document_id: &str, new_title: &str) -> Result<Document>;

    /// Append a version. Archived documents are append-frozen.
    async fn add_version(&self, document_id: &str, version: NewVersion) -> Result<Document>;

    async fn archive(&self, document_id: &str) -> Result<Document>;

    async fn unarchive(&self, document_id: &str) -> Result<Document>;

    /// Active documents when `archived` is false, archived ones otherwise.
    async fn list(&self, archived: bool) -> Result<Vec<Document>>;

    async fn get_by_id(&self, document_id: &str) -> Result<Document>;
}

#[async_trait]
pub trait SignerStore: Send + Sync {
    async fn attach(&self, document_id: &str, info: SignerInfo) -> Result<Signer>;

    async fn get(&self, signer_id: &str) -> Result<Signer>;

    async fn mark_signed(
        &self,
        signer_id: &str,
        signature_image: Vec<u8>,
        signed_date: DateTime<Utc>,
    ) -> Result<Signer>;

    /// Signed -> Pending, wiping the signature image and date.
    async fn clear_signature(&self, signer_id: &str) -> Result<Signer>;

    async fn archive(&self, signer_id: &str) -> Result<Signer>;

    async fn unarchive(&self, signer_id: &str) -> Result<Signer>;

    /// Permanently remove an archived signer.
    async fn hard_delete(&self, signer_id: &str) -> Result<()>;

    /// Non-archived signers of a document when `archived` is false, archived ones otherwise.
    async fn list_by_document(&self, document_id: &str, archived: bool) -> Result<Vec<Signer>>;

    async fn list_all(&self) -> Result<Vec<Signer>>;

    async fn list_archived(&self) -> Result<Vec<Signer>>;

    /// Display-name projection of the most recently attached signer with this email.
    async fn get_by_email(&self, email: &str) -> Result<SignerName>;
}
