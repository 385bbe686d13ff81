//! Client for the hosted inference API.
//!
//! Every model is reachable at `{base_url}/models/{model_id}`. Image models take the raw image
//! bytes as the request body; text models take `{"inputs": ..., "parameters": ...}`. Both answer
//! with a list of `{"generated_text": ...}` candidates.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, header::CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;

use super::{GeneratedText, GenerationParameters, ImageToText, InferenceError, TextToText};
use crate::config::HubConfig;

/// Longest slice of an unparseable error body that ends up in an error message
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Long-lived handle to the inference API, shared by both pipeline stages.
pub struct HubClient {
    client: Client,
    base_url: Url,
    token: String,
    wait_for_model: bool,
}

impl HubClient {
    pub fn new(config: &HubConfig) -> anyhow::Result<Self> {
        let token = config
            .token
            .clone()
            .ok_or_else(|| anyhow::anyhow!(crate::config::MISSING_TOKEN_MESSAGE))?;
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            token,
            wait_for_model: config.wait_for_model,
        })
    }

    /// Endpoint URL for a model identifier such as `google/flan-t5-large`
    fn model_url(&self, model: &str) -> Result<Url, InferenceError> {
        ensure_slash(&self.base_url)
            .join("models/")
            .and_then(|models| models.join(model))
            .map_err(|e| InferenceError::InvalidModel {
                model: model.to_string(),
                message: e.to_string(),
            })
    }

    async fn send(&self, model: &str, request: RequestBuilder) -> Result<Vec<GeneratedText>, InferenceError> {
        let mut request = request.bearer_auth(&self.token);
        if self.wait_for_model {
            request = request.header("x-wait-for-model", "true");
        }

        let response = request.send().await.map_err(|source| InferenceError::Request {
            model: model.to_string(),
            source,
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| InferenceError::Request {
            model: model.to_string(),
            source,
        })?;

        if !status.is_success() {
            tracing::error!(model, status = status.as_u16(), "Inference API returned an error");
            return Err(InferenceError::Status {
                model: model.to_string(),
                status: status.as_u16(),
                message: hub_error_message(&body),
            });
        }

        debug!(model, body = %body, "Inference API response body");

        match serde_json::from_str::<HubOutput>(&body) {
            Ok(HubOutput::Many(outputs)) => Ok(outputs),
            Ok(HubOutput::One(output)) => Ok(vec![output]),
            Err(e) => {
                tracing::error!(model, error = %e, "Failed to parse inference response");
                Err(InferenceError::Decode {
                    model: model.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}

/// Most tasks answer with a list; a few pipelines answer with a bare object.
#[derive(Deserialize)]
#[serde(untagged)]
enum HubOutput {
    Many(Vec<GeneratedText>),
    One(GeneratedText),
}

/// Error payload, e.g. `{"error": "Model is currently loading", "estimated_time": 20.0}`
#[derive(Deserialize)]
struct HubErrorBody {
    error: HubErrorMessage,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HubErrorMessage {
    One(String),
    Many(Vec<String>),
}

/// Extract a readable message from an error response body.
fn hub_error_message(body: &str) -> String {
    match serde_json::from_str::<HubErrorBody>(body) {
        Ok(HubErrorBody {
            error: HubErrorMessage::One(message),
        }) => message,
        Ok(HubErrorBody {
            error: HubErrorMessage::Many(messages),
        }) => messages.join("; "),
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect(),
    }
}

/// Makes sure a url has a trailing slash, so that `join` appends instead of replacing the last
/// path segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", new_url.path());
        new_url.set_path(&path);
        new_url
    }
}

#[async_trait]
impl ImageToText for HubClient {
    #[instrument(skip(self, image), fields(bytes = image.len()), err)]
    async fn image_to_text(&self, model: &str, image: Bytes, content_type: &str) -> Result<Vec<GeneratedText>, InferenceError> {
        let url = self.model_url(model)?;
        let request = self.client.post(url).header(CONTENT_TYPE, content_type).body(image);
        self.send(model, request).await
    }
}

#[async_trait]
impl TextToText for HubClient {
    #[instrument(skip(self, inputs, parameters), fields(prompt_chars = inputs.len()), err)]
    async fn text_to_text(
        &self,
        model: &str,
        inputs: &str,
        parameters: &GenerationParameters,
    ) -> Result<Vec<GeneratedText>, InferenceError> {
        let url = self.model_url(model)?;
        let payload = json!({
            "inputs": inputs,
            "parameters": parameters,
            // Cached answers would make every sampled story for the same caption identical
            "options": { "use_cache": !parameters.do_sample },
        });
        let request = self.client.post(url).json(&payload);
        self.send(model, request).await
    }
}
