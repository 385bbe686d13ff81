//! Story stage: caption in, short story out.
//!
//! The caption is dropped verbatim into a fixed few-shot prompt. Nothing is escaped, so a caption
//! that itself looks like `Description: ... Story: ...` ends up inside the prompt as-is.

use std::{sync::Arc, time::Duration};
use tracing::{debug, instrument};

use super::{GenerationParameters, InferenceError, Stage, TextToText, first_candidate, with_deadline};
use crate::config::StorytellingConfig;

/// Instructions and the single worked example that precede every caption. Trailing spaces are
/// part of the prompt.
const PROMPT_PREAMBLE: &str = concat!(
    "\n",
    "You are a creative storyteller. \n",
    "You are given a short image description. \n",
    "Write a detailed, imaginative, and engaging story of about 150 words.\n",
    "Include a beginning, middle, and end. Use varied sentences and imagination. \n",
    "Do NOT repeat the description word-for-word.\n",
    "\n",
    "Example:\n",
    "Description: A cat wearing a wizard hat.\n",
    "Story: Once upon a time, a clever cat discovered a hidden spellbook in the attic. It practiced magic \
     spells every night, causing small mysterious events around the house. One day, the cat accidentally \
     summoned a tiny dragon, and together they embarked on magical adventures that taught them courage, \
     friendship, and the importance of curiosity.\n",
    "\n",
    "Now, generate a story for this description:\n",
);

const STORY_LABEL: &str = "Story:";

/// Build the prompt sent to the text model for `description`.
pub fn build_prompt(description: &str) -> String {
    format!("{PROMPT_PREAMBLE}Description: {description}\n{STORY_LABEL}\n")
}

/// Turn the raw model output into the story shown to the user.
///
/// Some backends return `prompt + completion`; the echoed prompt and a leading `Story:` label are
/// dropped before trimming.
pub fn clean_story(raw: &str, prompt: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix(prompt.trim()) {
        text = rest.trim_start();
    }
    if let Some(rest) = text.strip_prefix(STORY_LABEL) {
        text = rest;
    }
    text.trim().to_string()
}

pub struct Storyteller {
    model: Arc<dyn TextToText>,
    model_id: String,
    parameters: GenerationParameters,
    timeout: Duration,
}

impl Storyteller {
    pub fn new(model: Arc<dyn TextToText>, config: &StorytellingConfig) -> Self {
        Self {
            model,
            model_id: config.model.clone(),
            parameters: GenerationParameters::from(config),
            timeout: config.timeout,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Generate a story for `caption`. Output is sampled, so two calls rarely agree.
    #[instrument(skip(self), fields(model = %self.model_id))]
    pub async fn tell(&self, caption: &str) -> Result<String, InferenceError> {
        let prompt = build_prompt(caption);

        let outputs = with_deadline(
            Stage::Storytelling,
            self.timeout,
            self.model.text_to_text(&self.model_id, &prompt, &self.parameters),
        )
        .await?;

        let raw = first_candidate(&self.model_id, outputs)?;
        let story = clean_story(&raw, &prompt);
        if story.is_empty() {
            return Err(InferenceError::EmptyOutput {
                model: self.model_id.clone(),
            });
        }

        debug!(words = story.split_whitespace().count(), "Generated story");
        Ok(story)
    }
}
