//! HTTP handler for embedded static assets.

use axum::{
    body::Body,
    extract::Path,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, instrument};

use crate::static_assets::Assets;

/// Serve a file from the embedded `static/` folder. Assets are revalidated on every load.
#[instrument]
pub async fn serve_embedded_asset(Path(path): Path<String>) -> Response {
    let Some(content) = Assets::get(&path) else {
        debug!("No embedded asset at {}", path);
        return StatusCode::NOT_FOUND.into_response();
    };

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    (
        [
            (header::CONTENT_TYPE, mime.as_ref().to_string()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from(content.data.into_owned()),
    )
        .into_response()
}
