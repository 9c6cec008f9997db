use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartRejection},
};
use std::time::Instant;
use uuid::Uuid;

use crate::AppState;
use crate::api::models::generate::GenerateResponse;
use crate::compress::compress_upload;
use crate::errors::{Error, Result};
use crate::format::check_declared_type;
use crate::reclaim::ArtifactReclaimer;
use crate::style::Style;
use crate::upload::{UploadLimits, receive_form};

/// Turn an uploaded image into colouring-book line art.
///
/// Expects multipart/form-data with an `image` file (jpeg, png or webp) and an optional `style`
/// (`original`, `anime` or `ghibli`; anything else is treated as `original`). Every temporary
/// file the request creates is removed before the response is sent, whatever the outcome.
pub async fn generate_from_image(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<GenerateResponse>> {
    let request_id = Uuid::new_v4();
    let started = Instant::now();
    let mut reclaimer = ArtifactReclaimer::new(request_id);

    let outcome = run_pipeline(&state, request_id, multipart, &mut reclaimer).await;
    reclaimer.reclaim().await;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok((style, image_base64)) => {
            tracing::info!(request_id = %request_id, style = %style, elapsed_ms, "Generation request completed");
            Ok(Json(GenerateResponse { image_base64 }))
        }
        Err(e) => {
            tracing::debug!(request_id = %request_id, elapsed_ms, status = e.status_code().as_u16(), "Generation request failed");
            Err(e)
        }
    }
}

/// Answer any non-POST method on the generation routes, without reading the body.
pub async fn method_not_allowed() -> Error {
    Error::MethodNotAllowed
}

async fn run_pipeline(
    state: &AppState,
    request_id: Uuid,
    multipart: std::result::Result<Multipart, MultipartRejection>,
    reclaimer: &mut ArtifactReclaimer,
) -> Result<(Style, String)> {
    let limits = UploadLimits {
        upload_dir: &state.config.upload_dir,
        max_body_size: state.config.max_body_size,
    };
    let form = receive_form(request_id, multipart, limits, reclaimer).await?;

    let upload = form.image.ok_or(Error::MissingFile)?;
    check_declared_type(upload.mime_type.as_ref())?;

    let style = Style::resolve(form.style.as_deref());
    tracing::info!(
        request_id = %request_id,
        style = %style,
        byte_size = upload.byte_size,
        declared_name = %upload.declared_name,
        "Accepted upload"
    );

    let compressed = compress_upload(&upload, &state.compression, reclaimer).await?;
    let image_base64 = state.generator.generate(&compressed, style.instruction()).await?;

    Ok((style, image_base64))
}
