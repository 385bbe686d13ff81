//! Captioning stage: image file in, one descriptive sentence out.

use bytes::Bytes;
use std::{path::Path, sync::Arc, time::Duration};
use tracing::{info, instrument};

use super::{ImageToText, InferenceError, Stage, first_candidate, with_deadline};
use crate::config::CaptioningConfig;

pub struct Captioner {
    model: Arc<dyn ImageToText>,
    model_id: String,
    timeout: Duration,
}

impl Captioner {
    pub fn new(model: Arc<dyn ImageToText>, config: &CaptioningConfig) -> Self {
        Self {
            model,
            model_id: config.model.clone(),
            timeout: config.timeout,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Caption the image stored at `image`. Only the first candidate is kept.
    #[instrument(skip(self), fields(model = %self.model_id))]
    pub async fn describe(&self, image: &Path) -> Result<String, InferenceError> {
        let bytes = tokio::fs::read(image).await?;
        let content_type = mime_guess::from_path(image).first_or_octet_stream();

        let outputs = with_deadline(
            Stage::Captioning,
            self.timeout,
            self.model.image_to_text(&self.model_id, Bytes::from(bytes), content_type.as_ref()),
        )
        .await?;

        let caption = first_candidate(&self.model_id, outputs)?;
        info!(caption = %caption, "Detected content");
        Ok(caption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::GeneratedText;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns canned captions and remembers what it was sent
    struct StaticCaptions {
        captions: Vec<&'static str>,
        seen: Mutex<Vec<(String, usize, String)>>,
    }

    #[async_trait]
    impl ImageToText for StaticCaptions {
        async fn image_to_text(&self, model: &str, image: Bytes, content_type: &str) -> Result<Vec<GeneratedText>, InferenceError> {
            self.seen
                .lock()
                .unwrap()
                .push((model.to_string(), image.len(), content_type.to_string()));
            Ok(self
                .captions
                .iter()
                .map(|c| GeneratedText {
                    generated_text: c.to_string(),
                })
                .collect())
        }
    }

    struct SlowModel;

    #[async_trait]
    impl ImageToText for SlowModel {
        async fn image_to_text(&self, _: &str, _: Bytes, _: &str) -> Result<Vec<GeneratedText>, InferenceError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(vec![])
        }
    }

    fn write_image(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nnot-really-a-png").unwrap();
        path
    }

    #[tokio::test]
    async fn test_describe_returns_first_caption() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(&dir, "dog.png");
        let model = Arc::new(StaticCaptions {
            captions: vec!["a dog running in a park", "a brown dog"],
            seen: Mutex::new(vec![]),
        });
        let captioner = Captioner::new(model.clone(), &CaptioningConfig::default());

        let caption = captioner.describe(&image).await.unwrap();

        assert_eq!(caption, "a dog running in a park");
        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "Salesforce/blip-image-captioning-base");
        assert_eq!(seen[0].2, "image/png");
    }

    #[tokio::test]
    async fn test_jpeg_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(&dir, "cat.JPG");
        let model = Arc::new(StaticCaptions {
            captions: vec!["a cat"],
            seen: Mutex::new(vec![]),
        });
        let captioner = Captioner::new(model.clone(), &CaptioningConfig::default());

        captioner.describe(&image).await.unwrap();

        assert_eq!(model.seen.lock().unwrap()[0].2, "image/jpeg");
    }

    #[tokio::test]
    async fn test_no_candidates_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(&dir, "dog.png");
        let model = Arc::new(StaticCaptions {
            captions: vec![],
            seen: Mutex::new(vec![]),
        });
        let captioner = Captioner::new(model, &CaptioningConfig::default());

        let err = captioner.describe(&image).await.unwrap_err();
        assert!(matches!(err, InferenceError::EmptyOutput { .. }));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(StaticCaptions {
            captions: vec!["unused"],
            seen: Mutex::new(vec![]),
        });
        let captioner = Captioner::new(model.clone(), &CaptioningConfig::default());

        let err = captioner.describe(&dir.path().join("gone.png")).await.unwrap_err();

        assert!(matches!(err, InferenceError::Io(_)));
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_applies() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(&dir, "dog.png");
        let config = CaptioningConfig {
            timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let captioner = Captioner::new(Arc::new(SlowModel), &config);

        let err = captioner.describe(&image).await.unwrap_err();
        assert!(matches!(
            err,
            InferenceError::Timeout {
                stage: Stage::Captioning,
                ..
            }
        ));
    }
}
