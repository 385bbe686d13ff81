//! API request/response models for interactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::interactions::{Interaction, InteractionState};

/// Snapshot of the session's current interaction.
///
/// `caption` appears once captioning has finished and `story` once storytelling has finished.
/// `error` is set only in the `failed` state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InteractionResponse {
    /// Absent while the session is `idle`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub state: InteractionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl InteractionResponse {
    /// Response for a session that has not uploaded anything
    pub fn idle() -> Self {
        Self {
            id: None,
            state: InteractionState::Idle,
            file_name: None,
            caption: None,
            story: None,
            error: None,
            created_at: None,
            updated_at: None,
        }
    }
}

impl From<Interaction> for InteractionResponse {
    fn from(interaction: Interaction) -> Self {
        Self {
            id: Some(interaction.id),
            state: interaction.state,
            file_name: Some(interaction.file_name),
            caption: interaction.caption,
            story: interaction.story,
            error: interaction.error,
            created_at: Some(interaction.created_at),
            updated_at: Some(interaction.updated_at),
        }
    }
}
