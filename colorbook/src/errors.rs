use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error as ThisError;

/// Every way a generation request can end without an image.
///
/// Each variant maps to exactly one HTTP status and one user-facing message. None of them are
/// retried.
#[derive(ThisError, Debug)]
pub enum Error {
    /// The route only accepts POST
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// The body could not be parsed as multipart/form-data
    #[error("Invalid multipart form: {message}")]
    MalformedUpload { message: String },

    /// No `image` field in the form
    #[error("No image uploaded")]
    MissingFile,

    /// Body exceeded the configured limit
    #[error("Upload exceeds maximum allowed size of {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    /// Declared file type is unknown or outside the allow-list
    #[error("Unsupported file type: {}", mime_type.as_deref().unwrap_or("unknown"))]
    UnsupportedMediaType { mime_type: Option<String> },

    /// The upload could not be decoded, resized or re-encoded
    #[error("Failed to process image: {message}")]
    CompressionFailed { message: String },

    /// The generation service answered without an image
    #[error("No image returned by the generation service")]
    GenerationEmpty,

    /// Transport or service-side failure from the generation service
    #[error("{message}")]
    GenerationFailed { message: String },

    /// The request outlived the server's request timeout
    #[error("Request timed out after {after:?}")]
    TimedOut { after: Duration },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

/// JSON body of every failed response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Error::MalformedUpload { .. }
            | Error::MissingFile
            | Error::PayloadTooLarge { .. }
            | Error::UnsupportedMediaType { .. } => StatusCode::BAD_REQUEST,
            Error::CompressionFailed { .. }
            | Error::GenerationEmpty
            | Error::GenerationFailed { .. }
            | Error::TimedOut { .. }
            | Error::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message returned to the caller.
    ///
    /// Client errors keep their short canonical wording; server-side failures carry the
    /// underlying message so the frontend can show what went wrong upstream.
    pub fn user_message(&self) -> String {
        match self {
            Error::MalformedUpload { .. } => "Invalid multipart form".to_string(),
            Error::UnsupportedMediaType { .. } => "Unsupported file type".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details - different log levels based on severity
        match &self {
            Error::CompressionFailed { .. }
            | Error::GenerationEmpty
            | Error::GenerationFailed { .. }
            | Error::TimedOut { .. }
            | Error::Internal { .. } => {
                tracing::error!("Image pipeline error: {:#}", self);
            }
            Error::MethodNotAllowed
            | Error::MalformedUpload { .. }
            | Error::MissingFile
            | Error::PayloadTooLarge { .. }
            | Error::UnsupportedMediaType { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let body = ErrorResponse {
            error: self.user_message(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Convert from I/O errors on temporary artifacts
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal {
            operation: format!("access temporary file: {err}"),
        }
    }
}

/// Type alias for pipeline results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::MethodNotAllowed.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(Error::MissingFile.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::MalformedUpload { message: "eof".into() }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::UnsupportedMediaType { mime_type: None }.status_code(),
            StatusCode::BAD_REQUEST
        );
        // Oversized bodies are an input-validation failure like any other
        assert_eq!(Error::PayloadTooLarge { limit: 10 }.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::CompressionFailed { message: "bad".into() }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(Error::GenerationEmpty.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            Error::TimedOut {
                after: Duration::from_secs(120)
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::GenerationFailed { message: "boom".into() }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(Error::MissingFile.user_message(), "No image uploaded");
        assert_eq!(Error::MethodNotAllowed.user_message(), "Method not allowed");
        assert_eq!(
            Error::MalformedUpload { message: "boundary".into() }.user_message(),
            "Invalid multipart form"
        );
        assert_eq!(
            Error::UnsupportedMediaType {
                mime_type: Some("image/gif".into())
            }
            .user_message(),
            "Unsupported file type"
        );
        // Upstream messages pass through untouched
        assert_eq!(
            Error::GenerationFailed {
                message: "Invalid API key".into()
            }
            .user_message(),
            "Invalid API key"
        );
    }

    #[tokio::test]
    async fn test_into_response_is_json() {
        let response = Error::MissingFile.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "No image uploaded");
    }
}
