//! # colorbook: photo to colouring-book line art
//!
//! `colorbook` is a small HTTP service that accepts an uploaded photo and a style selector,
//! shrinks and re-encodes the photo, asks an external image generation service to redraw it as
//! black-and-white colouring-book line art, and returns the result as base64.
//!
//! ## Request Flow
//!
//! Each request runs one strictly sequential pipeline with no state shared between requests:
//!
//! 1. **Upload** ([`upload`]): the multipart body is streamed into a uniquely named file in the
//!    upload directory, with a hard size limit.
//! 2. **Format gate** ([`format`]): the declared filename must map to jpeg, png or webp.
//! 3. **Compression** ([`compress`]): the image is resized and re-encoded as lossy WebP, with
//!    width and quality chosen by the upload's byte size.
//! 4. **Style** ([`style`]): the `style` field selects one of three fixed instructions.
//! 5. **Generation** ([`generation`]): one call to the image generation service.
//! 6. **Response**: `{"imageBase64": ...}` or `{"error": ...}` ([`errors`]).
//!
//! Every temporary file is owned by a per-request [`reclaim::ArtifactReclaimer`], which removes
//! it once the pipeline ends, including when the request is cut short by the server's request
//! timeout.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use colorbook::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = colorbook::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     colorbook::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod compress;
pub mod config;
pub mod errors;
pub mod format;
pub mod generation;
pub mod reclaim;
pub mod style;
pub mod telemetry;
pub mod upload;

#[cfg(test)]
pub mod test_utils;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{HeaderValue, Method, header};
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::{
    Router,
    routing::{get, post},
};
use bon::Builder;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};

use crate::api::handlers::generate::{generate_from_image, method_not_allowed};
use crate::compress::CompressionPolicy;
use crate::config::CorsOrigin;
use crate::errors::Error;
use crate::generation::{ImageGenerator, OpenAiImageGenerator};
pub use config::Config;

/// Application state shared across all request handlers.
///
/// Built once at startup and never mutated: the generator client and compression policy are
/// shared by reference between concurrent requests.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .compression(config.compression.policy())
///     .generator(Arc::new(OpenAiImageGenerator::new(&config.openai)))
///     .config(config)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub generator: Arc<dyn ImageGenerator>,
    pub compression: CompressionPolicy,
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allowed = &config.cors.allowed_origins;

    // tower-http rejects `*` inside an origin list, so a wildcard anywhere means any origin
    let allow_origin = if allowed.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in allowed {
            if let CorsOrigin::Url(url) = origin {
                // Origins never carry a trailing slash; Url::as_str adds one for bare hosts
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Bound every request by `request_timeout`.
///
/// Dropping the inner future cancels the handler mid-pipeline; its artifact reclaimer removes
/// whatever it registered on drop. The caller gets the usual JSON error body.
async fn enforce_request_timeout(State(request_timeout): State<Duration>, request: Request, next: Next) -> Response {
    match tokio::time::timeout(request_timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => Error::TimedOut { after: request_timeout }.into_response(),
    }
}

/// Build the application router with all endpoints and middleware.
///
/// - `POST /generate-from-image` and `POST /api/generate`: the generation pipeline, with the
///   body limit applied; any other method answers 405 without reading the body
/// - `GET /healthz`: liveness
/// - CORS, request timeout and tracing layers
///
/// # Errors
///
/// Returns an error if the CORS configuration is invalid.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let body_limit = DefaultBodyLimit::max(state.config.max_body_size as usize);
    let cors = create_cors_layer(&state.config)?;
    let request_timeout = state.config.request_timeout;

    let generate_route = || {
        post(generate_from_image)
            .fallback(method_not_allowed)
            .layer(body_limit.clone())
    };

    let router = Router::new()
        .route("/generate-from-image", generate_route())
        .route("/api/generate", generate_route())
        .route("/healthz", get(|| async { "OK" }))
        .with_state(state)
        .layer(cors)
        .layer(from_fn_with_state(request_timeout, enforce_request_timeout))
        // Add tracing layer
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// Main application struct that owns the router and its configuration.
///
/// 1. **Create**: [`Application::new`] prepares the upload directory and builds the generator
///    client and router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests until the
///    shutdown signal resolves
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting colorbook with configuration: {:#?}", config);

        tokio::fs::create_dir_all(&config.upload_dir).await?;
        info!(upload_dir = %config.upload_dir.display(), "Upload directory ready");

        let generator: Arc<dyn ImageGenerator> = Arc::new(OpenAiImageGenerator::new(&config.openai));
        let state = AppState::builder()
            .compression(config.compression.policy())
            .generator(generator)
            .config(config.clone())
            .build();

        let router = build_router(state)?;

        Ok(Self { router, config })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "colorbook listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        // Run the server with graceful shutdown
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Shutdown telemetry
        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
