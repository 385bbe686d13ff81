//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `STORYLOOM_CONFIG`
//! environment variable. A missing file is fine: every field has a default.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `STORYLOOM_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `STORYLOOM_STORYTELLING__TEMPERATURE=0.7` sets the `storytelling.temperature` field.
//!
//! ## Access token
//!
//! The hosted inference API needs an access token. It is taken from `hub.token` when set
//! (YAML or `STORYLOOM_HUB__TOKEN`), otherwise from `HUGGINGFACEHUB_API_TOKEN`, otherwise from
//! `HUGGINGFACEHUB_API_KEY`. If none of these is present, [`Config::load`] fails and the process
//! never binds its listener.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! STORYLOOM_PORT=8080
//!
//! # Use a different captioning checkpoint
//! STORYLOOM_CAPTIONING__MODEL=Salesforce/blip-image-captioning-large
//!
//! # Give the story model more time
//! STORYLOOM_STORYTELLING__TIMEOUT=5m
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, time::Duration};
use url::Url;

use crate::errors::Error;

/// Environment variables checked for the access token, in priority order.
pub const TOKEN_ENV_VARS: [&str; 2] = ["HUGGINGFACEHUB_API_TOKEN", "HUGGINGFACEHUB_API_KEY"];

/// Message shown when no access token can be found.
pub const MISSING_TOKEN_MESSAGE: &str =
    "Missing Hugging Face API token. Set HUGGINGFACEHUB_API_TOKEN (or HUGGINGFACEHUB_API_KEY) in the environment or a .env file.";

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "STORYLOOM_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Page title shown in the browser
    pub title: String,
    /// Hosted inference API connection
    pub hub: HubConfig,
    /// Image captioning stage
    pub captioning: CaptioningConfig,
    /// Story generation stage
    pub storytelling: StorytellingConfig,
    /// Upload handling
    pub uploads: UploadsConfig,
    /// Browser session tracking
    pub sessions: SessionsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Connection settings for the hosted inference API.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    /// Base URL of the inference API. Models are addressed as `{base_url}/models/{model_id}`.
    pub base_url: Url,
    /// Access token. Usually left unset and read from `HUGGINGFACEHUB_API_TOKEN`.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Timeout applied by the HTTP client to every request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Ask the API to block until a cold model is loaded instead of answering 503
    pub wait_for_model: bool,
}

impl fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubConfig")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("wait_for_model", &self.wait_for_model)
            .finish()
    }
}

/// Image captioning stage settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptioningConfig {
    /// Model identifier of the image-to-text checkpoint
    pub model: String,
    /// Deadline for one captioning call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Story generation stage settings. The sampling parameters are sent verbatim with every request.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorytellingConfig {
    /// Model identifier of the text-to-text checkpoint
    pub model: String,
    /// Maximum number of tokens the model may generate
    pub max_new_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Nucleus sampling cutoff
    pub top_p: f32,
    /// Sample instead of greedy decoding
    pub do_sample: bool,
    /// Deadline for one generation call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Upload handling settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    /// Directory for per-request temporary files (default: system temp dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Maximum accepted image size in bytes
    pub max_file_size: u64,
    /// Accepted file extensions, compared case-insensitively
    pub allowed_extensions: Vec<String>,
}

/// Browser session settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionsConfig {
    /// Name of the cookie carrying the session id
    pub cookie_name: String,
    /// Sessions without activity for this long are forgotten
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// How often idle sessions are swept
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            title: "Image to Story Generator".to_string(),
            hub: HubConfig::default(),
            captioning: CaptioningConfig::default(),
            storytelling: StorytellingConfig::default(),
            uploads: UploadsConfig::default(),
            sessions: SessionsConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://api-inference.huggingface.co").expect("static url is valid"),
            token: None,
            request_timeout: Duration::from_secs(300),
            wait_for_model: true,
        }
    }
}

impl Default for CaptioningConfig {
    fn default() -> Self {
        Self {
            model: "Salesforce/blip-image-captioning-base".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl Default for StorytellingConfig {
    fn default() -> Self {
        Self {
            model: "google/flan-t5-large".to_string(),
            max_new_tokens: 400,
            temperature: 0.9,
            top_p: 0.95,
            do_sample: true,
            timeout: Duration::from_secs(180),
        }
    }
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_file_size: 10 * 1024 * 1024, // 10 MiB
            allowed_extensions: vec!["png".to_string(), "jpg".to_string(), "jpeg".to_string()],
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            cookie_name: "storyloom_session".to_string(),
            idle_timeout: Duration::from_secs(60 * 60), // 1 hour
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Pick the access token: an explicitly configured value wins, then the environment variables in
/// [`TOKEN_ENV_VARS`] order. Blank values count as absent.
pub fn resolve_hub_token(configured: Option<String>, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    configured
        .into_iter()
        .chain(TOKEN_ENV_VARS.iter().filter_map(|name| lookup(name)))
        .map(|token| token.trim().to_string())
        .find(|token| !token.is_empty())
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        config.hub.token = resolve_hub_token(config.hub.token.take(), |name| std::env::var(name).ok());

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.hub.token.is_none() {
            return Err(Error::Configuration {
                message: MISSING_TOKEN_MESSAGE.to_string(),
            });
        }

        if self.captioning.model.trim().is_empty() || self.storytelling.model.trim().is_empty() {
            return Err(Error::Configuration {
                message: "Config validation: captioning.model and storytelling.model must name a model".to_string(),
            });
        }

        if self.storytelling.max_new_tokens == 0 {
            return Err(Error::Configuration {
                message: "Config validation: storytelling.max_new_tokens must be positive (default: 400)".to_string(),
            });
        }

        if !(self.storytelling.temperature > 0.0) {
            return Err(Error::Configuration {
                message: format!(
                    "Config validation: storytelling.temperature must be positive, got {}",
                    self.storytelling.temperature
                ),
            });
        }

        if !(self.storytelling.top_p > 0.0 && self.storytelling.top_p <= 1.0) {
            return Err(Error::Configuration {
                message: format!(
                    "Config validation: storytelling.top_p must be in (0, 1], got {}",
                    self.storytelling.top_p
                ),
            });
        }

        let timeouts = [
            ("hub.request_timeout", self.hub.request_timeout),
            ("captioning.timeout", self.captioning.timeout),
            ("storytelling.timeout", self.storytelling.timeout),
            ("sessions.idle_timeout", self.sessions.idle_timeout),
            ("sessions.sweep_interval", self.sessions.sweep_interval),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, duration)| duration.is_zero()) {
            return Err(Error::Configuration {
                message: format!("Config validation: {name} cannot be zero"),
            });
        }

        if self.uploads.max_file_size == 0 {
            return Err(Error::Configuration {
                message: "Config validation: uploads.max_file_size cannot be 0".to_string(),
            });
        }

        if self.uploads.allowed_extensions.iter().all(|ext| ext.trim().is_empty()) {
            return Err(Error::Configuration {
                message: "Config validation: uploads.allowed_extensions cannot be empty".to_string(),
            });
        }

        if self.sessions.cookie_name.trim().is_empty() {
            return Err(Error::Configuration {
                message: "Config validation: sessions.cookie_name cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values. STORYLOOM_CONFIG names the
            // file itself and is not a config key.
            .merge(Env::prefixed("STORYLOOM_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
