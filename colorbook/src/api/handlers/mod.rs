//! HTTP request handlers.
//!
//! - [`generate`]: the upload → compress → generate pipeline

pub mod generate;
