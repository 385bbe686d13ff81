//! Server-rendered page.

use askama::Template;
use axum::{extract::State, response::Html};
use tracing::instrument;

use crate::{
    AppState,
    errors::{Error, Result},
};

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate<'a> {
    title: &'a str,
    /// Value of the file input's `accept` attribute, e.g. `.png,.jpg,.jpeg`
    accept: String,
    max_file_size_mb: u64,
}

#[instrument(skip_all)]
pub async fn index(State(state): State<AppState>) -> Result<Html<String>> {
    let uploads = &state.config.uploads;
    let template = IndexTemplate {
        title: &state.config.title,
        accept: uploads
            .allowed_extensions
            .iter()
            .map(|ext| format!(".{}", ext.trim().to_ascii_lowercase()))
            .collect::<Vec<_>>()
            .join(","),
        max_file_size_mb: uploads.max_file_size.div_ceil(1024 * 1024),
    };

    template.render().map(Html).map_err(|e| Error::Internal {
        operation: format!("render index page: {e}"),
    })
}
