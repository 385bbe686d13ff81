//! Clients and stages for the two hosted models.
//!
//! The pipeline talks to two pretrained checkpoints behind a hosted inference API:
//!
//! - an image-to-text model that captions the uploaded picture ([`caption::Captioner`])
//! - a text-to-text model that turns the caption into a story ([`story::Storyteller`])
//!
//! Both stages depend on the model traits [`ImageToText`] and [`TextToText`] rather than on a
//! concrete client, so they can be driven by [`hub::HubClient`] in production and by in-memory
//! fakes in tests. The client is built once at startup and shared between stages.

pub mod caption;
pub mod hub;
pub mod story;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use thiserror::Error as ThisError;

use crate::config::StorytellingConfig;

/// The two pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Captioning,
    Storytelling,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Captioning => "captioning",
            Stage::Storytelling => "storytelling",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures of a hosted model call.
#[derive(ThisError, Debug)]
pub enum InferenceError {
    /// The request never produced a response (connection refused, TLS failure, client timeout...)
    #[error("request to model {model} failed: {source}")]
    Request {
        model: String,
        #[source]
        source: reqwest::Error,
    },

    /// The API answered with a non-success status
    #[error("model {model} returned HTTP {status}: {message}")]
    Status { model: String, status: u16, message: String },

    /// The response body did not have the expected shape
    #[error("could not decode response from model {model}: {message}")]
    Decode { model: String, message: String },

    /// The response contained no usable text
    #[error("model {model} returned no generated text")]
    EmptyOutput { model: String },

    /// The model identifier cannot be turned into an endpoint URL
    #[error("invalid model identifier {model}: {message}")]
    InvalidModel { model: String, message: String },

    /// The stage deadline elapsed
    #[error("{stage} did not finish within {after:?}")]
    Timeout { stage: Stage, after: Duration },

    /// The interaction was cancelled while the stage was running
    #[error("{stage} was cancelled")]
    Cancelled { stage: Stage },

    /// The uploaded image could not be read back from disk
    #[error("failed to read uploaded image: {0}")]
    Io(#[from] std::io::Error),
}

impl InferenceError {
    /// Message that is safe to show to the person using the page
    pub fn user_message(&self) -> String {
        match self {
            InferenceError::Request { .. } => "Could not reach the model host".to_string(),
            InferenceError::Status { model, message, .. } => format!("The {model} model returned an error: {message}"),
            InferenceError::Decode { .. } => "The model returned an unexpected response".to_string(),
            InferenceError::EmptyOutput { .. } => "The model returned no text".to_string(),
            InferenceError::InvalidModel { .. } => "The model is misconfigured".to_string(),
            InferenceError::Timeout { stage, after } => {
                format!("The {stage} model did not answer within {} seconds", after.as_secs())
            }
            InferenceError::Cancelled { .. } => "The request was cancelled".to_string(),
            InferenceError::Io(_) => "Failed to read the uploaded image".to_string(),
        }
    }
}

/// One candidate returned by either model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedText {
    pub generated_text: String,
}

/// Sampling parameters sent with every story request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParameters {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub do_sample: bool,
}

impl From<&StorytellingConfig> for GenerationParameters {
    fn from(config: &StorytellingConfig) -> Self {
        Self {
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            do_sample: config.do_sample,
        }
    }
}

/// A hosted image-to-text model.
#[async_trait]
pub trait ImageToText: Send + Sync {
    async fn image_to_text(&self, model: &str, image: Bytes, content_type: &str) -> Result<Vec<GeneratedText>, InferenceError>;
}

/// A hosted text-to-text model.
#[async_trait]
pub trait TextToText: Send + Sync {
    async fn text_to_text(
        &self,
        model: &str,
        inputs: &str,
        parameters: &GenerationParameters,
    ) -> Result<Vec<GeneratedText>, InferenceError>;
}

/// Run one stage future under a deadline.
pub(crate) async fn with_deadline<T, F>(stage: Stage, after: Duration, fut: F) -> Result<T, InferenceError>
where
    F: std::future::Future<Output = Result<T, InferenceError>>,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| InferenceError::Timeout { stage, after })?
}

/// Take the first candidate, discarding alternates.
pub(crate) fn first_candidate(model: &str, outputs: Vec<GeneratedText>) -> Result<String, InferenceError> {
    outputs
        .into_iter()
        .next()
        .map(|output| output.generated_text)
        .ok_or_else(|| InferenceError::EmptyOutput { model: model.to_string() })
}
