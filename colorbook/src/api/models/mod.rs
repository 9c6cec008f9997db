//! API request and response data models.
//!
//! These define the JSON contract with the browser frontend, which uses camelCase keys.

pub mod generate;
