//! Error and attachment responses

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

use crate::error::EngineError;

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) | EngineError::TokenNotFound => StatusCode::NOT_FOUND,
            EngineError::InvalidState(_) => StatusCode::CONFLICT,
            EngineError::TokenAlreadyUsed => StatusCode::GONE,
            EngineError::ImageProcessing(_) | EngineError::Storage(_) | EngineError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, self.client_message()).into_response()
    }
}

/// `attachment` or `inline`
#[derive(Debug, Clone, Copy)]
pub enum Disposition {
    Attachment,
    Inline,
}

/// Binary body labelled as a PDF, named after the document
pub fn document_download(bytes: Vec<u8>, document_name: &str, disposition: Disposition) -> Response {
    let kind = match disposition {
        Disposition::Attachment => "attachment",
        Disposition::Inline => "inline",
    };
    let value = format!("{}; filename=\"{}\"", kind, quoted_filename(document_name));
    let disposition = HeaderValue::from_str(&value)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

/// Keep a filename safe inside a quoted header parameter
fn quoted_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_control() || !c.is_ascii() => '_',
            c => c,
        })
        .collect()
}
