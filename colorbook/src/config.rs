//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `COLORBOOK_CONFIG`
//! environment variable. A missing file is not an error: every field has a default except the
//! generation service API key.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `COLORBOOK_` override YAML values
//! 3. **OPENAI_API_KEY** - Special case: overrides `openai.api_key` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `COLORBOOK_COMPRESSION__MODE=fixed` sets the `compression.mode` field.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Required: credential for the image generation service
//! OPENAI_API_KEY=sk-...
//!
//! # Override server port
//! COLORBOOK_PORT=8080
//!
//! # Point at a compatible gateway instead of api.openai.com
//! COLORBOOK_OPENAI__BASE_URL=https://gateway.internal/v1
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::compress::{CompressionPolicy, CompressionTier, MAX_WEBP_DIMENSION};
use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "COLORBOOK_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults defined in the `Default` implementation; only `openai.api_key`
/// must be supplied.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Directory that receives upload and compressed artifacts while a request is in flight
    pub upload_dir: PathBuf,
    /// Maximum request body size in bytes for the generation routes
    pub max_body_size: u64,
    /// Overall ceiling for a single request, including the generation call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// CORS policy for the browser frontend
    pub cors: CorsConfig,
    /// Resize/re-encode policy applied before the generation call
    pub compression: CompressionConfig,
    /// External image generation service
    pub openai: OpenAiConfig,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            upload_dir: std::env::temp_dir().join("colorbook-uploads"),
            max_body_size: 8 * 1024 * 1024,
            request_timeout: Duration::from_secs(120),
            cors: CorsConfig::default(),
            compression: CompressionConfig::default(),
            openai: OpenAiConfig::default(),
            enable_otel_export: false,
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Url(
                Url::parse("http://localhost:8080").expect("static URL is valid"),
            )],
            max_age: None,
        }
    }
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

/// Which compression policy the pipeline applies.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// Width and quality chosen by the upload's byte size
    Adaptive,
    /// One width and quality for every upload
    Fixed,
}

/// Compression configuration.
///
/// ```yaml
/// compression:
///   mode: adaptive
///   size_threshold_bytes: 2000000
///   large_input: { width: 384, quality: 55 }
///   small_input: { width: 512, quality: 60 }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionConfig {
    pub mode: CompressionMode,
    /// Uploads strictly larger than this use `large_input`
    pub size_threshold_bytes: u64,
    pub large_input: CompressionTier,
    pub small_input: CompressionTier,
    /// Used when `mode` is `fixed`
    pub fixed: CompressionTier,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            mode: CompressionMode::Adaptive,
            size_threshold_bytes: 2_000_000,
            large_input: CompressionTier { width: 384, quality: 55 },
            small_input: CompressionTier { width: 512, quality: 60 },
            fixed: CompressionTier { width: 768, quality: 70 },
        }
    }
}

impl CompressionConfig {
    pub fn policy(&self) -> CompressionPolicy {
        match self.mode {
            CompressionMode::Adaptive => CompressionPolicy::Tiered {
                size_threshold_bytes: self.size_threshold_bytes,
                large_input: self.large_input,
                small_input: self.small_input,
            },
            CompressionMode::Fixed => CompressionPolicy::Fixed(self.fixed),
        }
    }
}

/// Image generation service configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OpenAiConfig {
    /// Bearer credential; usually supplied through `OPENAI_API_KEY`
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Base URL of the OpenAI-compatible API (the `/images/edits` path is appended)
    pub base_url: Url,
    /// Image model used for edits
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: Url::parse("https://api.openai.com/v1").expect("static URL is valid"),
            model: "gpt-image-1".to_string(),
        }
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url.as_str())
            .field("model", &self.model)
            .finish()
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.openai.api_key.as_deref().is_none_or(|key| key.trim().is_empty()) {
            return Err(Error::Internal {
                operation: "Config validation: no API key for the image generation service. \
                     Please set OPENAI_API_KEY or add openai.api_key to the config file."
                    .to_string(),
            });
        }

        if self.max_body_size == 0 {
            return Err(Error::Internal {
                operation: "Config validation: max_body_size must be greater than zero".to_string(),
            });
        }

        let compression = &self.compression;
        for (name, tier) in [
            ("large_input", compression.large_input),
            ("small_input", compression.small_input),
            ("fixed", compression.fixed),
        ] {
            if tier.width == 0 || tier.width > MAX_WEBP_DIMENSION {
                return Err(Error::Internal {
                    operation: format!(
                        "Config validation: compression.{name}.width ({}) must be between 1 and {MAX_WEBP_DIMENSION}",
                        tier.width
                    ),
                });
            }
            if tier.quality > 100 {
                return Err(Error::Internal {
                    operation: format!(
                        "Config validation: compression.{name}.quality ({}) must be between 0 and 100",
                        tier.quality
                    ),
                });
            }
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can override specific values
            // (COLORBOOK_CONFIG names the file itself and is not a field)
            .merge(Env::prefixed("COLORBOOK_").ignore(&["config"]).split("__"))
            // The conventional variable name for the OpenAI credential
            .merge(Env::raw().only(&["OPENAI_API_KEY"]).map(|_| "openai.api_key".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(config: &str) -> Args {
        Args {
            config: config.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_defaults_with_api_key_from_env() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("OPENAI_API_KEY", "sk-test");

            let config = Config::load(&args("missing.yaml"))?;

            assert_eq!(config.openai.api_key.as_deref(), Some("sk-test"));
            assert_eq!(config.port, 3000);
            assert_eq!(config.max_body_size, 8 * 1024 * 1024);
            assert_eq!(config.request_timeout, Duration::from_secs(120));
            assert_eq!(config.openai.model, "gpt-image-1");
            assert_eq!(config.openai.base_url.as_str(), "https://api.openai.com/v1");
            assert_eq!(config.compression.mode, CompressionMode::Adaptive);
            assert!(matches!(
                config.cors.allowed_origins.as_slice(),
                [CorsOrigin::Url(url)] if url.as_str() == "http://localhost:8080/"
            ));

            Ok(())
        });
    }

    #[test]
    fn test_missing_api_key_fails_validation() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let err = Config::load(&args("missing.yaml")).unwrap_err();
            assert!(err.to_string().contains("OPENAI_API_KEY"));
            Ok(())
        });
    }

    #[test]
    fn test_yaml_and_env_override() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "test.yaml",
                r#"
port: 9000
request_timeout: 30s
openai:
  api_key: sk-from-file
  model: gpt-image-1-mini
cors:
  allowed_origins: ["*"]
compression:
  mode: fixed
  fixed:
    width: 640
    quality: 65
"#,
            )?;

            jail.set_env("COLORBOOK_PORT", "8080");
            jail.set_env("COLORBOOK_HOST", "127.0.0.1");

            let config = Config::load(&args("test.yaml"))?;

            // Env vars should override
            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 8080);
            assert_eq!(config.bind_address(), "127.0.0.1:8080");

            // YAML values should be preserved
            assert_eq!(config.openai.api_key.as_deref(), Some("sk-from-file"));
            assert_eq!(config.openai.model, "gpt-image-1-mini");
            assert_eq!(config.request_timeout, Duration::from_secs(30));
            assert!(matches!(config.cors.allowed_origins.as_slice(), [CorsOrigin::Wildcard]));
            assert_eq!(
                config.compression.policy(),
                CompressionPolicy::Fixed(CompressionTier { width: 640, quality: 65 })
            );

            Ok(())
        });
    }

    #[test]
    fn test_openai_api_key_env_wins_over_file() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("test.yaml", "openai:\n  api_key: sk-from-file\n")?;
            jail.set_env("OPENAI_API_KEY", "sk-from-env");

            let config = Config::load(&args("test.yaml"))?;
            assert_eq!(config.openai.api_key.as_deref(), Some("sk-from-env"));

            Ok(())
        });
    }

    #[test]
    fn test_nested_env_override() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("OPENAI_API_KEY", "sk-test");
            jail.set_env("COLORBOOK_COMPRESSION__SIZE_THRESHOLD_BYTES", "1000000");

            let config = Config::load(&args("missing.yaml"))?;
            assert_eq!(config.compression.size_threshold_bytes, 1_000_000);

            Ok(())
        });
    }

    #[test]
    fn test_quality_above_100_rejected() {
        let mut config = Config::default();
        config.openai.api_key = Some("sk-test".to_string());
        config.compression.small_input.quality = 101;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("compression.small_input.quality"));
    }

    #[test]
    fn test_tier_width_beyond_webp_limit_rejected() {
        let mut config = Config::default();
        config.openai.api_key = Some("sk-test".to_string());
        config.compression.fixed.width = 20_000;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("compression.fixed.width"), "{err}");

        config.compression.fixed.width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_output_redacts_api_key() {
        let mut config = Config::default();
        config.openai.api_key = Some("sk-very-secret".to_string());

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-very-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("test.yaml", "openai:\n  api_key: sk\nnot_a_field: 1\n")?;
            assert!(Config::load(&args("test.yaml")).is_err());
            Ok(())
        });
    }
}
