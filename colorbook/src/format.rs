//! Declared media type check, run before any decoding work.

use mime_guess::Mime;

use crate::errors::{Error, Result};

/// Filename assumed when the client did not send one.
pub const DEFAULT_FILE_NAME: &str = "file.jpg";

/// Media types the pipeline accepts.
pub const ALLOWED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// Derive the media type from a filename's extension.
pub fn lookup_mime(file_name: &str) -> Option<Mime> {
    mime_guess::from_path(file_name).first()
}

/// Accept the upload only if its declared type is derivable and allow-listed.
pub fn check_declared_type(mime_type: Option<&Mime>) -> Result<()> {
    match mime_type {
        Some(mime) if ALLOWED_MIME_TYPES.contains(&mime.essence_str()) => Ok(()),
        other => Err(Error::UnsupportedMediaType {
            mime_type: other.map(|m| m.essence_str().to_string()),
        }),
    }
}
