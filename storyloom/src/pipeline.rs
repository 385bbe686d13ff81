//! The two-stage caption-then-story pipeline.

use std::{path::Path, sync::Arc};

use crate::{
    config::Config,
    inference::{ImageToText, InferenceError, Stage, TextToText, caption::Captioner, story::Storyteller},
    metrics::StageTimer,
};

/// Both stages, wired to their models once at startup.
pub struct Pipeline {
    captioner: Captioner,
    storyteller: Storyteller,
}

impl Pipeline {
    pub fn new(image_model: Arc<dyn ImageToText>, text_model: Arc<dyn TextToText>, config: &Config) -> Self {
        Self {
            captioner: Captioner::new(image_model, &config.captioning),
            storyteller: Storyteller::new(text_model, &config.storytelling),
        }
    }

    /// Build a pipeline where one client serves both stages
    pub fn with_client<C>(client: Arc<C>, config: &Config) -> Self
    where
        C: ImageToText + TextToText + 'static,
    {
        Self::new(client.clone(), client, config)
    }

    pub fn caption_model(&self) -> &str {
        self.captioner.model_id()
    }

    pub fn story_model(&self) -> &str {
        self.storyteller.model_id()
    }

    pub async fn caption(&self, image: &Path) -> Result<String, InferenceError> {
        let timer = StageTimer::start(Stage::Captioning);
        let result = self.captioner.describe(image).await;
        timer.finish(&result);
        result
    }

    pub async fn story(&self, caption: &str) -> Result<String, InferenceError> {
        let timer = StageTimer::start(Stage::Storytelling);
        let result = self.storyteller.tell(caption).await;
        timer.finish(&result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        inference::{GeneratedText, GenerationParameters},
        test_utils::{create_test_config, stage_count},
    };
    use async_trait::async_trait;
    use axum_prometheus::metrics_exporter_prometheus::PrometheusBuilder;
    use bytes::Bytes;
    use std::time::Duration;

    /// Never answers, so every call is in flight until its future is dropped
    struct Unresponsive;

    #[async_trait]
    impl ImageToText for Unresponsive {
        async fn image_to_text(&self, _: &str, _: Bytes, _: &str) -> Result<Vec<GeneratedText>, InferenceError> {
            std::future::pending().await
        }
    }

    #[async_trait]
    impl TextToText for Unresponsive {
        async fn text_to_text(&self, _: &str, _: &str, _: &GenerationParameters) -> Result<Vec<GeneratedText>, InferenceError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_abandoned_story_call_is_recorded_as_cancelled() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let pipeline = Pipeline::with_client(Arc::new(Unresponsive), &create_test_config("http://127.0.0.1:9"));

        // Same as a client disconnecting from the synchronous endpoint: the handler future is dropped
        let abandoned = tokio::time::timeout(Duration::from_millis(20), pipeline.story("a dog running in a park")).await;
        assert!(abandoned.is_err());

        let rendered = handle.render();
        assert_eq!(stage_count(&rendered, "storytelling", "cancelled").as_deref(), Some("1"));
        assert_eq!(stage_count(&rendered, "storytelling", "error"), None);
    }

    #[tokio::test]
    async fn test_abandoned_caption_call_is_recorded_as_cancelled() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("dog.png");
        std::fs::write(&image, b"\x89PNG\r\n\x1a\n").unwrap();
        let pipeline = Pipeline::with_client(Arc::new(Unresponsive), &create_test_config("http://127.0.0.1:9"));

        let abandoned = tokio::time::timeout(Duration::from_millis(20), pipeline.caption(&image)).await;
        assert!(abandoned.is_err());

        let rendered = handle.render();
        assert_eq!(stage_count(&rendered, "captioning", "cancelled").as_deref(), Some("1"));
    }
}
