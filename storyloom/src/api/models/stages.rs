//! API request/response models for the synchronous stage endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CaptionResponse {
    /// First caption returned by the image model
    pub caption: String,
    /// Model that produced the caption
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoryRequest {
    /// Image description, inserted verbatim into the prompt
    #[schema(example = "a dog running in a park")]
    pub caption: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoryResponse {
    pub caption: String,
    pub story: String,
    /// Model that wrote the story
    pub model: String,
}
