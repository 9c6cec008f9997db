//! Multipart ingestion.
//!
//! The `image` field is streamed chunk by chunk into a file in the upload directory, so the body
//! is never held in memory. The file is registered with the request's [`ArtifactReclaimer`] the
//! moment it is created.

use axum::extract::Multipart;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::http::StatusCode;
use mime_guess::Mime;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::format::{self, DEFAULT_FILE_NAME};
use crate::reclaim::ArtifactReclaimer;

/// Multipart field carrying the image.
pub const IMAGE_FIELD: &str = "image";
/// Multipart field carrying the style key.
pub const STYLE_FIELD: &str = "style";

/// The original upload, materialized on disk.
#[derive(Debug, Clone)]
pub struct UploadedAsset {
    pub request_id: Uuid,
    pub path: PathBuf,
    /// Filename sent by the client, or [`DEFAULT_FILE_NAME`]
    pub declared_name: String,
    pub byte_size: u64,
    /// Derived from `declared_name`'s extension
    pub mime_type: Option<Mime>,
}

/// Everything the pipeline needs from the form.
#[derive(Debug)]
pub struct ReceivedForm {
    /// `None` when the form had no `image` field
    pub image: Option<UploadedAsset>,
    /// Raw `style` value, as sent
    pub style: Option<String>,
}

/// Limits and placement for one upload.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits<'a> {
    pub upload_dir: &'a Path,
    pub max_body_size: u64,
}

/// Consume the multipart body.
///
/// Fails with [`Error::MalformedUpload`] if the body is not valid multipart/form-data and with
/// [`Error::PayloadTooLarge`] as soon as the streamed byte count passes `max_body_size`.
#[tracing::instrument(skip_all, fields(request_id = %request_id))]
pub async fn receive_form(
    request_id: Uuid,
    multipart: std::result::Result<Multipart, MultipartRejection>,
    limits: UploadLimits<'_>,
    reclaimer: &mut ArtifactReclaimer,
) -> Result<ReceivedForm> {
    let mut multipart = multipart.map_err(|e| Error::MalformedUpload { message: e.body_text() })?;

    let mut image: Option<UploadedAsset> = None;
    let mut style: Option<String> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limits.max_body_size))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            IMAGE_FIELD if image.is_none() => {
                let declared_name = field
                    .file_name()
                    .filter(|name| !name.is_empty())
                    .unwrap_or(DEFAULT_FILE_NAME)
                    .to_string();

                let path = limits.upload_dir.join(request_id.to_string());
                reclaimer.register(&path);
                let mut file = tokio::fs::File::create(&path).await?;

                tracing::info!(declared_name = %declared_name, "Starting upload stream");

                let mut byte_size = 0u64;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| multipart_error(e, limits.max_body_size))?
                {
                    byte_size += chunk.len() as u64;

                    // Check size limit incrementally to fail fast
                    if byte_size > limits.max_body_size {
                        tracing::warn!(
                            byte_size,
                            max_body_size = limits.max_body_size,
                            "Upload size limit exceeded, aborting"
                        );
                        return Err(Error::PayloadTooLarge {
                            limit: limits.max_body_size,
                        });
                    }

                    file.write_all(&chunk).await?;
                }
                file.flush().await?;

                tracing::debug!(byte_size, "Completed upload stream");

                image = Some(UploadedAsset {
                    request_id,
                    mime_type: format::lookup_mime(&declared_name),
                    path,
                    declared_name,
                    byte_size,
                });
            }
            STYLE_FIELD => {
                style = Some(field.text().await.map_err(|e| multipart_error(e, limits.max_body_size))?);
            }
            _ => {
                // Unknown fields and duplicate images: drain and ignore
                while field
                    .chunk()
                    .await
                    .map_err(|e| multipart_error(e, limits.max_body_size))?
                    .is_some()
                {}
            }
        }
    }

    Ok(ReceivedForm { image, style })
}

/// The HTTP layer's body limit surfaces as a multipart read error with a 413 status.
fn multipart_error(err: MultipartError, limit: u64) -> Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge { limit }
    } else {
        Error::MalformedUpload { message: err.body_text() }
    }
}
