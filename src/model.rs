//! Domain records: documents, versions, signers and signing tokens

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A document and its ordered version history (oldest first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub file_name: String,
    pub archived_date: Option<DateTime<Utc>>,
    pub versions: Vec<Version>,
}

impl Document {
    pub fn is_archived(&self) -> bool {
        self.archived_date.is_some()
    }

    /// The authoritative version
    pub fn latest_version(&self) -> Option<&Version> {
        self.versions.last()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub id: String,
    pub add_date: DateTime<Utc>,
    pub preview: Option<String>,
    pub file_path: String,
}

/// Version metadata handed over by the upload collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVersion {
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub preview: Option<String>,
}

impl NewVersion {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            preview: None,
        }
    }

    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = Some(preview.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.file_path.trim().is_empty() {
            return Err(EngineError::Validation("version file path is required".into()));
        }
        Ok(())
    }

    pub(crate) fn into_version(self) -> Version {
        Version {
            id: uuid::Uuid::new_v4().to_string(),
            add_date: Utc::now(),
            preview: self.preview.filter(|p| !p.is_empty()),
            file_path: self.file_path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerState {
    Pending,
    Signed,
    Archived,
}

impl SignerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerState::Pending => "pending",
            SignerState::Signed => "signed",
            SignerState::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SignerState::Pending),
            "signed" => Some(SignerState::Signed),
            "archived" => Some(SignerState::Archived),
            _ => None,
        }
    }
}

/// A person designated to sign one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signer {
    pub id: String,
    pub document_id: String,
    pub display_name: String,
    pub email: String,
    pub state: SignerState,
    /// Functional state held when the signer was archived
    pub archived_from: Option<SignerState>,
    pub created_date: DateTime<Utc>,
    pub signed_date: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub signature_image: Option<Vec<u8>>,
}

impl Signer {
    pub fn is_archived(&self) -> bool {
        self.state == SignerState::Archived
    }

    /// Transition to Signed. Only valid from Pending.
    pub(crate) fn sign(&mut self, image: Vec<u8>, signed_date: DateTime<Utc>) -> Result<()> {
        if self.state != SignerState::Pending {
            return Err(EngineError::InvalidState(format!(
                "signer {} is {} and cannot sign",
                self.id,
                self.state.as_str()
            )));
        }
        self.state = SignerState::Signed;
        self.signed_date = Some(signed_date);
        self.signature_image = Some(image);
        Ok(())
    }

    pub(crate) fn archive(&mut self) -> Result<()> {
        if self.state == SignerState::Archived {
            return Err(EngineError::InvalidState(format!("signer {} is already archived", self.id)));
        }
        self.archived_from = Some(self.state);
        self.state = SignerState::Archived;
        Ok(())
    }

    pub(crate) fn unarchive(&mut self) -> Result<()> {
        if self.state != SignerState::Archived {
            return Err(EngineError::InvalidState(format!("signer {} is not archived", self.id)));
        }
        self.state = self.archived_from.take().unwrap_or(SignerState::Pending);
        Ok(())
    }

    /// Drop the signature and return to Pending so the signer can sign again.
    pub(crate) fn clear_signature(&mut self) -> Result<()> {
        if self.state != SignerState::Signed {
            return Err(EngineError::InvalidState(format!(
                "signer {} is {} and has no signature to clear",
                self.id,
                self.state.as_str()
            )));
        }
        self.state = SignerState::Pending;
        self.signed_date = None;
        self.signature_image = None;
        Ok(())
    }

    pub(crate) fn ensure_deletable(&self) -> Result<()> {
        if self.state != SignerState::Archived {
            return Err(EngineError::InvalidState(format!(
                "signer {} must be archived before it can be deleted",
                self.id
            )));
        }
        Ok(())
    }
}

/// Signer details supplied when attaching a signer to a document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerInfo {
    pub display_name: String,
    pub email: String,
}

impl SignerInfo {
    pub fn new(display_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            email: email.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.display_name.trim().is_empty() {
            return Err(EngineError::Validation("display name is required".into()));
        }
        if !is_valid_email(&self.email) {
            return Err(EngineError::Validation("email address is malformed".into()));
        }
        Ok(())
    }

    pub(crate) fn into_signer(self, document_id: &str) -> Signer {
        Signer {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            display_name: self.display_name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            state: SignerState::Pending,
            archived_from: None,
            created_date: Utc::now(),
            signed_date: None,
            signature_image: None,
        }
    }
}

/// What an email lookup is allowed to reveal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerName {
    pub display_name: String,
}

/// Minimal shape check: one `@`, non-empty local part, dotted domain, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// A single-use token binding a signer to a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningToken {
    pub token: String,
    pub signer_id: String,
    pub document_id: String,
    pub used: bool,
    pub issued_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

/// Data needed to render a signing page for a token.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningContext {
    pub document_id: String,
    pub document_name: String,
    pub signer_id: String,
    pub display_name: String,
}

/// A composited signature and the name of the document it belongs to.
#[derive(Debug, Clone)]
pub struct SignedArtifact {
    pub image: Vec<u8>,
    pub document_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Signer {
        SignerInfo::new("Alice", "alice@x.com").into_signer("doc-1")
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("alice@x.com"));
        assert!(is_valid_email(" bob.smith@mail.example.org "));
        assert!(!is_valid_email("alice"));
        assert!(!is_valid_email("@x.com"));
        assert!(!is_valid_email("alice@x"));
        assert!(!is_valid_email("alice@@x.com"));
        assert!(!is_valid_email("al ice@x.com"));
        assert!(!is_valid_email("alice@x.com."));
    }

    #[test]
    fn test_signer_info_normalises_email() {
        let signer = SignerInfo::new(" Alice ", "Alice@X.com").into_signer("doc-1");
        assert_eq!(signer.email, "alice@x.com");
        assert_eq!(signer.display_name, "Alice");
        assert_eq!(signer.state, SignerState::Pending);
    }

    #[test]
    fn test_sign_only_from_pending() {
        let mut signer = pending();
        signer.sign(vec![1, 2, 3], Utc::now()).unwrap();
        assert_eq!(signer.state, SignerState::Signed);
        assert!(matches!(
            signer.sign(vec![4], Utc::now()),
            Err(EngineError::InvalidState(_))
        ));
        assert_eq!(signer.signature_image.as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_unarchive_restores_recorded_state() {
        let mut signer = pending();
        signer.archive().unwrap();
        signer.unarchive().unwrap();
        assert_eq!(signer.state, SignerState::Pending);

        signer.sign(vec![9], Utc::now()).unwrap();
        signer.archive().unwrap();
        assert_eq!(signer.archived_from, Some(SignerState::Signed));
        assert!(signer.signature_image.is_some());
        signer.unarchive().unwrap();
        assert_eq!(signer.state, SignerState::Signed);
        assert_eq!(signer.archived_from, None);
    }

    #[test]
    fn test_delete_requires_archive() {
        let mut signer = pending();
        assert!(signer.ensure_deletable().is_err());
        signer.archive().unwrap();
        assert!(signer.ensure_deletable().is_ok());
    }

    #[test]
    fn test_clear_signature_returns_to_pending() {
        let mut signer = pending();
        assert!(signer.clear_signature().is_err());
        signer.sign(vec![1], Utc::now()).unwrap();
        signer.clear_signature().unwrap();
        assert_eq!(signer.state, SignerState::Pending);
        assert!(signer.signed_date.is_none());
        assert!(signer.signature_image.is_none());
    }
}
