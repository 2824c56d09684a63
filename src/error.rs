//! Error types for signflow

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Signing token not found")]
    TokenNotFound,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Signing token already used")]
    TokenAlreadyUsed,

    /// The detail is kept for logs; `client_message` is what crosses the boundary.
    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Message safe to return to an untrusted caller.
    pub fn client_message(&self) -> String {
        match self {
            EngineError::ImageProcessing(_) => "The signature image could not be processed".to_string(),
            EngineError::Storage(_) | EngineError::Config(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn not_found(what: &str, id: &str) -> Self {
        EngineError::NotFound(format!("{} {}", what, id))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<r2d2::Error> for EngineError {
    fn from(e: r2d2::Error) -> Self {
        EngineError::Storage(format!("Failed to get connection: {}", e))
    }
}

impl From<image::ImageError> for EngineError {
    fn from(e: image::ImageError) -> Self {
        EngineError::ImageProcessing(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_detail_is_not_exposed() {
        let err = EngineError::ImageProcessing("Format error decoding Png: bad IHDR".into());
        assert!(err.to_string().contains("bad IHDR"));
        assert!(!err.client_message().contains("IHDR"));
    }

    #[test]
    fn test_domain_errors_keep_their_message() {
        let err = EngineError::not_found("document", "42");
        assert_eq!(err.client_message(), "Not found: document 42");
        assert_eq!(EngineError::TokenAlreadyUsed.client_message(), "Signing token already used");
    }
}
