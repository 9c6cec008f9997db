//! Client for the external image generation service.
//!
//! This module defines the [`ImageGenerator`] trait so the pipeline can be exercised without
//! network calls, and [`OpenAiImageGenerator`], which talks to an OpenAI-compatible
//! `/images/edits` endpoint.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use url::Url;

use crate::compress::CompressedAsset;
use crate::config::OpenAiConfig;
use crate::errors::{Error, Result};

/// Trait for turning a compressed image plus an instruction into a new image.
///
/// Implementations make exactly one attempt: no retries and no internal timeout. The host's
/// request timeout bounds the call.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Request a single edited image.
    ///
    /// Returns the base64-encoded image.
    ///
    /// # Errors
    /// - [`Error::GenerationEmpty`] if the service answered without an image
    /// - [`Error::GenerationFailed`] for transport failures and service-side errors, carrying
    ///   the upstream message
    async fn generate(&self, image: &CompressedAsset, instruction: &str) -> Result<String>;
}

// ============================================================================
// Production Implementation using reqwest
// ============================================================================

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Image generator backed by the OpenAI images API.
#[derive(Clone)]
pub struct OpenAiImageGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiImageGenerator {
    pub fn new(config: &OpenAiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: edits_endpoint(&config.base_url),
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.model.clone(),
        }
    }
}

fn edits_endpoint(base_url: &Url) -> String {
    format!("{}/images/edits", base_url.as_str().trim_end_matches('/'))
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    #[tracing::instrument(skip_all, fields(model = %self.model, width = image.width, quality = image.quality))]
    async fn generate(&self, image: &CompressedAsset, instruction: &str) -> Result<String> {
        let bytes = tokio::fs::read(&image.path).await?;
        let file_name = image
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("image.webp")
            .to_string();

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/webp")
            .map_err(|e| Error::GenerationFailed { message: e.to_string() })?;

        let form = Form::new()
            .text("model", self.model.clone())
            .text("prompt", instruction.to_string())
            .text("n", "1")
            .text("size", "auto")
            .part("image", part);

        tracing::debug!(
            endpoint = %self.endpoint,
            width = image.width,
            height = image.height,
            byte_size = image.byte_size,
            "Sending image edit request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(endpoint = %self.endpoint, error = %e, "Image edit request failed");
                Error::GenerationFailed { message: e.to_string() }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::GenerationFailed { message: e.to_string() })?;

        if !status.is_success() {
            let message = match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(parsed) => parsed.error.message,
                Err(_) => format!("Generation service returned {status}: {body}"),
            };
            tracing::warn!(status = status.as_u16(), message = %message, "Generation service rejected request");
            return Err(Error::GenerationFailed { message });
        }

        let parsed: ImagesResponse = serde_json::from_str(&body).map_err(|e| Error::GenerationFailed {
            message: format!("Unreadable response from generation service: {e}"),
        })?;

        let image_base64 = parsed
            .data
            .into_iter()
            .next()
            .and_then(|item| item.b64_json)
            .filter(|b64| !b64.is_empty())
            .ok_or(Error::GenerationEmpty)?;

        tracing::info!(status = status.as_u16(), response_len = image_base64.len(), "Image edit completed");

        Ok(image_base64)
    }
}
