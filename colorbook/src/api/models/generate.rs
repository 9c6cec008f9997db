use serde::{Deserialize, Serialize};

/// Successful generation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// The generated image, base64-encoded
    pub image_base64: String,
}
