//! Per-session interaction records and their state machine.
//!
//! An interaction is one trip through the pipeline for one uploaded image:
//!
//! ```text
//! idle -> file_received -> captioning -> caption_shown -> storytelling -> story_shown
//! ```
//!
//! Any non-terminal state may also move to `failed` (a stage fault) or `cancelled`. `story_shown`,
//! `failed` and `cancelled` are terminal. There is no retry edge: a fresh upload starts a fresh
//! interaction, which replaces the previous one in its session.

pub mod runner;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error as ThisError;
use utoipa::ToSchema;
use uuid::Uuid;

pub use store::InteractionStore;

/// Opaque browser session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub type InteractionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InteractionState {
    /// No image uploaded yet
    Idle,
    FileReceived,
    Captioning,
    CaptionShown,
    Storytelling,
    StoryShown,
    Failed,
    Cancelled,
}

impl InteractionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InteractionState::StoryShown | InteractionState::Failed | InteractionState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionState::Idle => "idle",
            InteractionState::FileReceived => "file_received",
            InteractionState::Captioning => "captioning",
            InteractionState::CaptionShown => "caption_shown",
            InteractionState::Storytelling => "storytelling",
            InteractionState::StoryShown => "story_shown",
            InteractionState::Failed => "failed",
            InteractionState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InteractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress reported by the runner
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    CaptioningStarted,
    CaptionReady(String),
    StorytellingStarted,
    StoryReady(String),
    Failed(String),
    Cancelled,
}

#[derive(ThisError, Debug, PartialEq)]
#[error("cannot apply {update} while {from}")]
pub struct InvalidTransition {
    pub from: InteractionState,
    pub update: &'static str,
}

impl Update {
    fn name(&self) -> &'static str {
        match self {
            Update::CaptioningStarted => "captioning_started",
            Update::CaptionReady(_) => "caption_ready",
            Update::StorytellingStarted => "storytelling_started",
            Update::StoryReady(_) => "story_ready",
            Update::Failed(_) => "failed",
            Update::Cancelled => "cancelled",
        }
    }
}

/// The most recent interaction of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub id: InteractionId,
    pub state: InteractionState,
    pub file_name: String,
    pub caption: Option<String>,
    pub story: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Interaction {
    /// A freshly uploaded image, waiting for the captioning stage
    pub fn received(file_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            state: InteractionState::FileReceived,
            file_name: file_name.into(),
            caption: None,
            story: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to the next state. Only the edges of the state machine are accepted.
    pub fn apply(&mut self, update: Update) -> Result<(), InvalidTransition> {
        use InteractionState::*;

        let next = match (&self.state, &update) {
            (FileReceived, Update::CaptioningStarted) => Captioning,
            (Captioning, Update::CaptionReady(_)) => CaptionShown,
            (CaptionShown, Update::StorytellingStarted) => Storytelling,
            (Storytelling, Update::StoryReady(_)) => StoryShown,
            (state, Update::Failed(_)) if !state.is_terminal() => Failed,
            (state, Update::Cancelled) if !state.is_terminal() => Cancelled,
            (from, _) => {
                return Err(InvalidTransition {
                    from: *from,
                    update: update.name(),
                });
            }
        };

        match update {
            Update::CaptionReady(caption) => self.caption = Some(caption),
            Update::StoryReady(story) => self.story = Some(story),
            Update::Failed(message) => self.error = Some(message),
            _ => {}
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut interaction = Interaction::received("dog.png");
        assert_eq!(interaction.state, InteractionState::FileReceived);

        interaction.apply(Update::CaptioningStarted).unwrap();
        assert_eq!(interaction.state, InteractionState::Captioning);

        interaction.apply(Update::CaptionReady("a dog".to_string())).unwrap();
        assert_eq!(interaction.state, InteractionState::CaptionShown);
        assert_eq!(interaction.caption.as_deref(), Some("a dog"));

        interaction.apply(Update::StorytellingStarted).unwrap();
        interaction.apply(Update::StoryReady("Once".to_string())).unwrap();
        assert_eq!(interaction.state, InteractionState::StoryShown);
        assert_eq!(interaction.story.as_deref(), Some("Once"));
        assert!(interaction.state.is_terminal());
    }

    #[test]
    fn test_stages_cannot_be_skipped() {
        let mut interaction = Interaction::received("dog.png");
        let err = interaction.apply(Update::StoryReady("early".to_string())).unwrap_err();
        assert_eq!(err.from, InteractionState::FileReceived);
        assert_eq!(interaction.story, None);

        assert!(interaction.apply(Update::StorytellingStarted).is_err());
        assert_eq!(interaction.state, InteractionState::FileReceived);
    }

    #[test]
    fn test_failure_keeps_caption_and_has_no_story() {
        let mut interaction = Interaction::received("dog.png");
        interaction.apply(Update::CaptioningStarted).unwrap();
        interaction.apply(Update::CaptionReady("a dog".to_string())).unwrap();
        interaction.apply(Update::StorytellingStarted).unwrap();
        interaction.apply(Update::Failed("boom".to_string())).unwrap();

        assert_eq!(interaction.state, InteractionState::Failed);
        assert_eq!(interaction.caption.as_deref(), Some("a dog"));
        assert_eq!(interaction.story, None);
        assert_eq!(interaction.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut interaction = Interaction::received("dog.png");
        interaction.apply(Update::Cancelled).unwrap();
        assert_eq!(interaction.state, InteractionState::Cancelled);

        assert!(interaction.apply(Update::Failed("late".to_string())).is_err());
        assert!(interaction.apply(Update::CaptioningStarted).is_err());
        assert!(interaction.apply(Update::Cancelled).is_err());
        assert_eq!(interaction.error, None);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(InteractionState::CaptionShown).unwrap(),
            serde_json::json!("caption_shown")
        );
        assert_eq!(InteractionState::StoryShown.to_string(), "story_shown");
    }
}
