//! OpenAPI documentation for the JSON API at `/api/v1/*`, served at `/docs`.

use utoipa::OpenApi;

use crate::{
    api::{
        handlers::{interactions, stages},
        models::{
            interactions::InteractionResponse,
            stages::{CaptionResponse, StoryRequest, StoryResponse},
        },
    },
    errors::ErrorBody,
    interactions::InteractionState,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "storyloom",
        description = "Caption an uploaded image with a hosted image-to-text model, then turn the caption into a short story \
with a hosted text-generation model.

Browser sessions are tracked with a cookie; scripted clients can send the `x-storyloom-session` header instead."
    ),
    servers((url = "/api/v1")),
    paths(
        interactions::create_interaction,
        interactions::get_current_interaction,
        interactions::cancel_current_interaction,
        stages::create_caption,
        stages::create_story,
    ),
    components(schemas(
        InteractionResponse,
        InteractionState,
        CaptionResponse,
        StoryRequest,
        StoryResponse,
        ErrorBody,
    )),
    tags(
        (name = "interactions", description = "Upload an image and follow the caption and story as they are produced"),
        (name = "stages", description = "Run one pipeline stage synchronously"),
    )
)]
pub struct ApiDoc;
