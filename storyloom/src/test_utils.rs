//! Test utilities: an application wired to a wiremock stand-in for the inference API.

use axum_test::TestServer;
use std::time::Duration;
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

use crate::{
    Application, BackgroundServices,
    config::{CaptioningConfig, Config, HubConfig, StorytellingConfig, UploadsConfig},
};

/// A few bytes that pass the upload filter. The mocked model never looks at them.
pub const TEST_IMAGE: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR\x00\x00\x00\x01\x00\x00\x00\x01";

pub const TEST_MAX_FILE_SIZE: u64 = 4 * 1024;

pub const TEST_STAGE_TIMEOUT: Duration = Duration::from_secs(1);

pub const CAPTION_MODEL_PATH: &str = "/models/Salesforce/blip-image-captioning-base";

pub const STORY_MODEL_PATH: &str = "/models/google/flan-t5-large";

pub fn create_test_config(hub_url: &str) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        hub: HubConfig {
            base_url: Url::parse(hub_url).expect("valid mock url"),
            token: Some("hf_test_token".to_string()),
            request_timeout: Duration::from_secs(5),
            wait_for_model: false,
        },
        captioning: CaptioningConfig {
            timeout: TEST_STAGE_TIMEOUT,
            ..Default::default()
        },
        storytelling: StorytellingConfig {
            timeout: TEST_STAGE_TIMEOUT,
            ..Default::default()
        },
        uploads: UploadsConfig {
            max_file_size: TEST_MAX_FILE_SIZE,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub async fn create_test_server_with_config(customize: impl FnOnce(&mut Config)) -> (TestServer, MockServer, BackgroundServices) {
    crate::install_crypto_provider();
    let mock = MockServer::start().await;

    let mut config = create_test_config(&mock.uri());
    customize(&mut config);

    let app = Application::new(config).await.expect("Failed to create application");
    let (server, bg_services) = app.into_test_server();
    (server, mock, bg_services)
}

pub async fn create_test_server() -> (TestServer, MockServer, BackgroundServices) {
    create_test_server_with_config(|_| {}).await
}

/// Like [`create_test_server`], with uploads written to a directory the test can inspect
pub async fn create_test_server_with_upload_dir() -> (TestServer, MockServer, BackgroundServices, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create upload dir");
    let upload_dir = dir.path().to_path_buf();
    let (server, mock, bg_services) = create_test_server_with_config(|config| config.uploads.dir = Some(upload_dir)).await;
    (server, mock, bg_services, dir)
}

/// The `storyloom_stage_total` sample for `stage` and `outcome`, if one was rendered
pub fn stage_count(rendered: &str, stage: &str, outcome: &str) -> Option<String> {
    rendered
        .lines()
        .find(|line| {
            line.starts_with("storyloom_stage_total{")
                && line.contains(&format!("stage=\"{stage}\""))
                && line.contains(&format!("outcome=\"{outcome}\""))
        })
        .and_then(|line| line.rsplit(' ').next())
        .map(str::to_string)
}

fn generated(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!([{ "generated_text": text }]))
}

fn hub_error(status: u16, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(serde_json::json!({ "error": message }))
}

pub async fn mount_caption(mock: &MockServer, caption: &str) {
    Mock::given(method("POST"))
        .and(path(CAPTION_MODEL_PATH))
        .respond_with(generated(caption))
        .mount(mock)
        .await;
}

pub async fn mount_slow_caption(mock: &MockServer, caption: &str, delay: Duration) {
    Mock::given(method("POST"))
        .and(path(CAPTION_MODEL_PATH))
        .respond_with(generated(caption).set_delay(delay))
        .mount(mock)
        .await;
}

pub async fn mount_caption_error(mock: &MockServer, status: u16, message: &str) {
    Mock::given(method("POST"))
        .and(path(CAPTION_MODEL_PATH))
        .respond_with(hub_error(status, message))
        .mount(mock)
        .await;
}

pub async fn mount_story(mock: &MockServer, story: &str) {
    Mock::given(method("POST"))
        .and(path(STORY_MODEL_PATH))
        .respond_with(generated(story))
        .mount(mock)
        .await;
}

pub async fn mount_slow_story(mock: &MockServer, story: &str, delay: Duration) {
    Mock::given(method("POST"))
        .and(path(STORY_MODEL_PATH))
        .respond_with(generated(story).set_delay(delay))
        .mount(mock)
        .await;
}

pub async fn mount_story_error(mock: &MockServer, status: u16, message: &str) {
    Mock::given(method("POST"))
        .and(path(STORY_MODEL_PATH))
        .respond_with(hub_error(status, message))
        .mount(mock)
        .await;
}
