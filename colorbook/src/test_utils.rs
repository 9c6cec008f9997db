//! Test utilities: fixture images, a recording image generator, and app constructors.

use async_trait::async_trait;
use axum_test::TestServer;
use image::{ImageEncoder, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use crate::compress::CompressedAsset;
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::generation::ImageGenerator;
use crate::{AppState, build_router};

/// Deterministic RGB noise. Noise does not compress, which makes encoded sizes predictable.
pub fn noise_rgb(width: u32, height: u32) -> RgbImage {
    let mut state: u32 = 0x9E37_79B9;
    RgbImage::from_fn(width, height, |_, _| {
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xFF) as u8
        };
        image::Rgb([next(), next(), next()])
    })
}

pub fn noise_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = noise_rgb(width, height);
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 90)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
    out
}

pub fn noise_png(width: u32, height: u32) -> Vec<u8> {
    let img = noise_rgb(width, height);
    let mut out = Vec::new();
    image::codecs::png::PngEncoder::new(&mut out)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
    out
}

/// Files currently in an upload directory.
pub fn upload_dir_entries(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

/// What the mock generator answers.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Succeed(String),
    Empty,
    Fail(String),
}

/// Record of a call made to the mock generator, captured while the artifact still existed.
#[derive(Debug, Clone)]
pub struct GenerateCall {
    pub instruction: String,
    pub width: u32,
    pub quality: u8,
    pub file_existed: bool,
    pub decoded_dimensions: Option<(u32, u32)>,
}

/// Image generator that records calls and returns a configured outcome.
#[derive(Clone)]
pub struct MockImageGenerator {
    outcome: MockOutcome,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<GenerateCall>>>,
}

impl MockImageGenerator {
    pub fn new() -> Self {
        Self::with_outcome(MockOutcome::Succeed("aGVsbG8gY29sb3VyaW5nIGJvb2s=".to_string()))
    }

    pub fn with_outcome(outcome: MockOutcome) -> Self {
        Self {
            outcome,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Hold every call for `delay` before answering, to simulate a slow upstream.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<GenerateCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageGenerator for MockImageGenerator {
    async fn generate(&self, image: &CompressedAsset, instruction: &str) -> Result<String> {
        let bytes = tokio::fs::read(&image.path).await.ok();
        let decoded_dimensions = bytes
            .as_deref()
            .and_then(|b| image::load_from_memory(b).ok())
            .map(|img| (img.width(), img.height()));

        self.calls.lock().unwrap().push(GenerateCall {
            instruction: instruction.to_string(),
            width: image.width,
            quality: image.quality,
            file_existed: bytes.is_some(),
            decoded_dimensions,
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.outcome {
            MockOutcome::Succeed(b64) => Ok(b64.clone()),
            MockOutcome::Empty => Err(Error::GenerationEmpty),
            MockOutcome::Fail(message) => Err(Error::GenerationFailed { message: message.clone() }),
        }
    }
}

pub fn create_test_config(upload_dir: &Path) -> Config {
    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        upload_dir: upload_dir.to_path_buf(),
        ..Default::default()
    };
    config.openai.api_key = Some("sk-test".to_string());
    config
}

/// Build a test server around `generator`, with a fresh upload directory.
pub fn create_test_app(generator: MockImageGenerator) -> (TestServer, TempDir) {
    create_test_app_with(generator, |_| {})
}

pub fn create_test_app_with(generator: MockImageGenerator, customize: impl FnOnce(&mut Config)) -> (TestServer, TempDir) {
    let upload_dir = tempfile::tempdir().expect("Failed to create upload dir");
    let mut config = create_test_config(upload_dir.path());
    customize(&mut config);

    let state = AppState::builder()
        .compression(config.compression.policy())
        .config(config)
        .generator(Arc::new(generator))
        .build();
    let router = build_router(state).expect("Failed to build router");
    let server = TestServer::new(router).expect("Failed to create test server");

    (server, upload_dir)
}
