//! Synchronous single-stage endpoints. The handler future is dropped if the client goes away,
//! which also drops the in-flight model call.

use axum::{
    Json,
    extract::{Multipart, State},
};
use tracing::instrument;

use crate::{
    AppState,
    api::models::stages::{CaptionResponse, StoryRequest, StoryResponse},
    errors::{Error, Result},
    uploads,
};

/// Caption an image
#[utoipa::path(
    post,
    path = "/captions",
    tag = "stages",
    summary = "Caption image",
    description = "Runs only the captioning stage and waits for it. The upload is deleted before the response is sent.",
    request_body(content_type = "multipart/form-data", description = "Image file (png, jpg or jpeg) in the field `file`"),
    responses(
        (status = 200, description = "Caption produced", body = CaptionResponse),
        (status = 400, description = "No file or an empty file", body = crate::errors::ErrorBody),
        (status = 413, description = "File too large", body = crate::errors::ErrorBody),
        (status = 415, description = "File type not accepted", body = crate::errors::ErrorBody),
        (status = 502, description = "The captioning model failed", body = crate::errors::ErrorBody),
        (status = 504, description = "The captioning model did not answer in time", body = crate::errors::ErrorBody),
    )
)]
#[instrument(skip_all)]
pub async fn create_caption(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<CaptionResponse>> {
    let upload = uploads::receive_image(&mut multipart, &state.config.uploads).await?;
    let caption = state.pipeline.caption(upload.path()).await?;

    Ok(Json(CaptionResponse {
        caption,
        model: state.pipeline.caption_model().to_string(),
    }))
}

/// Write a story for a caption
#[utoipa::path(
    post,
    path = "/stories",
    tag = "stages",
    summary = "Generate story",
    description = "Runs only the storytelling stage. Output is sampled, so repeated calls with the same caption usually differ.",
    request_body = StoryRequest,
    responses(
        (status = 200, description = "Story generated", body = StoryResponse),
        (status = 400, description = "Blank caption", body = crate::errors::ErrorBody),
        (status = 502, description = "The story model failed", body = crate::errors::ErrorBody),
        (status = 504, description = "The story model did not answer in time", body = crate::errors::ErrorBody),
    )
)]
#[instrument(skip_all)]
pub async fn create_story(State(state): State<AppState>, Json(request): Json<StoryRequest>) -> Result<Json<StoryResponse>> {
    if request.caption.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "caption must not be blank".to_string(),
        });
    }

    let story = state.pipeline.story(&request.caption).await?;

    Ok(Json(StoryResponse {
        caption: request.caption,
        story,
        model: state.pipeline.story_model().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::{
        api::models::stages::{CaptionResponse, StoryResponse},
        errors::ErrorBody,
        test_utils::*,
    };
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};
    use serde_json::json;
    use std::time::Duration;

    fn form_with(file_name: &str, bytes: Vec<u8>) -> MultipartForm {
        MultipartForm::new().add_part("file", Part::bytes(bytes).file_name(file_name))
    }

    #[tokio::test]
    async fn test_caption_endpoint() {
        let (server, mock, _bg) = create_test_server().await;
        mount_caption(&mock, "a dog running in a park").await;

        let response = server
            .post("/api/v1/captions")
            .multipart(form_with("dog.JPEG", TEST_IMAGE.to_vec()))
            .await;

        response.assert_status_ok();
        let body: CaptionResponse = response.json();
        assert_eq!(body.caption, "a dog running in a park");
        assert_eq!(body.model, "Salesforce/blip-image-captioning-base");
    }

    #[tokio::test]
    async fn test_caption_rejects_other_extensions() {
        let (server, _mock, _bg) = create_test_server().await;

        for name in ["dog.gif", "dog.webp", "dog"] {
            let response = server.post("/api/v1/captions").multipart(form_with(name, TEST_IMAGE.to_vec())).await;
            response.assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
            let body: ErrorBody = response.json();
            assert!(body.message.starts_with("Unsupported file type"));
        }
    }

    #[tokio::test]
    async fn test_caption_rejects_oversized_upload() {
        let (server, _mock, _bg) = create_test_server().await;

        let too_big = vec![0u8; TEST_MAX_FILE_SIZE as usize + 1];
        server
            .post("/api/v1/captions")
            .multipart(form_with("big.png", too_big))
            .await
            .assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_caption_requires_file() {
        let (server, _mock, _bg) = create_test_server().await;

        server
            .post("/api/v1/captions")
            .multipart(MultipartForm::new().add_text("purpose", "story"))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        server
            .post("/api/v1/captions")
            .multipart(form_with("empty.png", vec![]))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_caption_model_fault_is_bad_gateway() {
        let (server, mock, _bg) = create_test_server().await;
        mount_caption_error(&mock, 400, "Image could not be decoded").await;

        let response = server.post("/api/v1/captions").multipart(form_with("dog.png", TEST_IMAGE.to_vec())).await;
        response.assert_status(StatusCode::BAD_GATEWAY);
        let body: ErrorBody = response.json();
        assert!(body.message.contains("Image could not be decoded"));
    }

    #[tokio::test]
    async fn test_story_endpoint() {
        let (server, mock, _bg) = create_test_server().await;
        mount_story(&mock, "Once upon a time, a dog ran through the park and found a friend.").await;

        let response = server.post("/api/v1/stories").json(&json!({ "caption": "a dog running in a park" })).await;

        response.assert_status_ok();
        let body: StoryResponse = response.json();
        assert_eq!(body.caption, "a dog running in a park");
        assert!(!body.story.is_empty());
        assert_ne!(body.story, body.caption);
        assert!(!body.story.contains("You are a creative storyteller"));
    }

    #[tokio::test]
    async fn test_story_rejects_blank_caption() {
        let (server, _mock, _bg) = create_test_server().await;

        server
            .post("/api/v1/stories")
            .json(&json!({ "caption": "   " }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_story_timeout_is_gateway_timeout() {
        let (server, mock, _bg) = create_test_server().await;
        mount_slow_story(&mock, "too late", TEST_STAGE_TIMEOUT + Duration::from_secs(1)).await;

        let response = server.post("/api/v1/stories").json(&json!({ "caption": "a dog" })).await;
        response.assert_status(StatusCode::GATEWAY_TIMEOUT);
        let body: ErrorBody = response.json();
        assert!(body.message.contains("did not answer"));
    }
}
