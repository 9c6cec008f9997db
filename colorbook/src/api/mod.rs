//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Generation** (`/generate-from-image`, `/api/generate`): multipart upload in, colouring-book
//!   line art out
//! - **Health** (`/healthz`): liveness check

pub mod handlers;
pub mod models;
