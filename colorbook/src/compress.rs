//! Resize and re-encode uploads before they are sent for generation.
//!
//! The generation service bills by input resolution, and upload latency grows with payload size,
//! so every upload is scaled to a fixed width and re-encoded as lossy WebP. The width and quality
//! come from a [`CompressionPolicy`]:
//!
//! | Policy | Upload size | Width | Quality |
//! |--------|-------------|-------|---------|
//! | Tiered (default) | > 2,000,000 bytes | 384 px | 55 |
//! | Tiered (default) | ≤ 2,000,000 bytes | 512 px | 60 |
//! | Fixed | any | 768 px | 70 |
//!
//! Only the width is constrained; height follows the source aspect ratio.

use image::{ImageReader, imageops::FilterType};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::errors::{Error, Result};
use crate::reclaim::ArtifactReclaimer;
use crate::upload::UploadedAsset;

/// Target width and encoder quality for one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CompressionTier {
    pub width: u32,
    /// WebP quality, 0-100
    pub quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionPolicy {
    /// Larger uploads get a smaller width and lower quality
    Tiered {
        size_threshold_bytes: u64,
        large_input: CompressionTier,
        small_input: CompressionTier,
    },
    Fixed(CompressionTier),
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        CompressionPolicy::Tiered {
            size_threshold_bytes: 2_000_000,
            large_input: CompressionTier { width: 384, quality: 55 },
            small_input: CompressionTier { width: 512, quality: 60 },
        }
    }
}

impl CompressionPolicy {
    /// Pick the tier for an upload of `byte_size` bytes.
    pub fn select(&self, byte_size: u64) -> CompressionTier {
        match *self {
            CompressionPolicy::Tiered {
                size_threshold_bytes,
                large_input,
                small_input,
            } => {
                if byte_size > size_threshold_bytes {
                    large_input
                } else {
                    small_input
                }
            }
            CompressionPolicy::Fixed(tier) => tier,
        }
    }
}

/// The re-encoded upload, written next to the original.
#[derive(Debug, Clone)]
pub struct CompressedAsset {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub byte_size: u64,
}

/// Path of the compressed sibling of `original`.
pub fn compressed_path(original: &Path) -> PathBuf {
    let mut path = original.as_os_str().to_owned();
    path.push(".webp");
    PathBuf::from(path)
}

/// Height that keeps the aspect ratio of a `src_width` x `src_height` image at `target_width`.
pub fn scaled_height(src_width: u32, src_height: u32, target_width: u32) -> u32 {
    if src_width == 0 {
        return 1;
    }
    let height = (src_height as f64 * target_width as f64 / src_width as f64).round() as u32;
    height.max(1)
}

/// Largest width or height libwebp will encode.
pub const MAX_WEBP_DIMENSION: u32 = 16383;

/// Decode, resize and WebP-encode an in-memory image.
///
/// CPU-bound; callers on the async runtime should go through [`compress_upload`], which moves
/// this onto the blocking pool. Targets outside what WebP can hold are rejected before any
/// resized buffer is allocated.
pub fn encode_scaled_webp(data: &[u8], tier: CompressionTier) -> Result<(Vec<u8>, u32, u32)> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| Error::CompressionFailed { message: e.to_string() })?
        .decode()
        .map_err(|e| Error::CompressionFailed { message: e.to_string() })?;

    let (width, height) = (tier.width, scaled_height(img.width(), img.height(), tier.width));
    if width > MAX_WEBP_DIMENSION || height > MAX_WEBP_DIMENSION {
        return Err(Error::CompressionFailed {
            message: format!(
                "{}x{} image would scale to {width}x{height}, beyond the WebP limit of {MAX_WEBP_DIMENSION} px",
                img.width(),
                img.height()
            ),
        });
    }
    let resized = img.resize_exact(width, height, FilterType::Lanczos3);

    // libwebp only takes 8-bit RGB or RGBA
    let quality = tier.quality as f32;
    let encoded = if resized.color().has_alpha() {
        let rgba = resized.to_rgba8();
        webp::Encoder::from_rgba(rgba.as_raw(), width, height).encode_simple(false, quality)
    } else {
        let rgb = resized.to_rgb8();
        webp::Encoder::from_rgb(rgb.as_raw(), width, height).encode_simple(false, quality)
    };
    let encoded = encoded.map_err(|e| Error::CompressionFailed {
        message: format!("WebP encoding failed: {e:?}"),
    })?;

    Ok((encoded.to_vec(), width, height))
}

/// Produce the compressed sibling of an upload.
///
/// The sibling path is registered with `reclaimer` before anything is written to it.
#[tracing::instrument(skip_all, fields(request_id = %upload.request_id, byte_size = upload.byte_size))]
pub async fn compress_upload(
    upload: &UploadedAsset,
    policy: &CompressionPolicy,
    reclaimer: &mut ArtifactReclaimer,
) -> Result<CompressedAsset> {
    let tier = policy.select(upload.byte_size);
    tracing::debug!(width = tier.width, quality = tier.quality, "Selected compression tier");

    let data = tokio::fs::read(&upload.path).await?;
    let (encoded, width, height) = tokio::task::spawn_blocking(move || encode_scaled_webp(&data, tier))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("join compression task: {e}"),
        })??;

    let path = compressed_path(&upload.path);
    reclaimer.register(&path);
    tokio::fs::write(&path, &encoded).await?;

    tracing::info!(
        width,
        height,
        quality = tier.quality,
        original_bytes = upload.byte_size,
        compressed_bytes = encoded.len(),
        "Compressed upload"
    );

    Ok(CompressedAsset {
        path,
        width,
        height,
        quality: tier.quality,
        byte_size: encoded.len() as u64,
    })
}
