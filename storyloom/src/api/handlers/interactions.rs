//! Handlers for the session's interaction.

use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
};
use tracing::{info, instrument};

use crate::{
    AppState,
    api::{
        models::interactions::InteractionResponse,
        session::{Session, SessionCookie},
    },
    errors::{Error, Result},
    interactions::runner::Run,
    uploads,
};

/// Upload an image and start captioning it
#[utoipa::path(
    post,
    path = "/interactions",
    tag = "interactions",
    summary = "Start interaction",
    description = "Upload an image in the multipart field `file`. The caption and story are produced in the background; \
poll `GET /interactions/current` to follow progress. Any interaction already running in this session is cancelled and replaced.",
    request_body(content_type = "multipart/form-data", description = "Image file (png, jpg or jpeg)"),
    responses(
        (status = 202, description = "Interaction started", body = InteractionResponse),
        (status = 400, description = "No file or an empty file", body = crate::errors::ErrorBody),
        (status = 413, description = "File too large", body = crate::errors::ErrorBody),
        (status = 415, description = "File type not accepted", body = crate::errors::ErrorBody),
    )
)]
#[instrument(skip(state, multipart), fields(session = %session.id))]
pub async fn create_interaction(
    State(state): State<AppState>,
    session: Session,
    mut multipart: Multipart,
) -> Result<(StatusCode, SessionCookie, Json<InteractionResponse>)> {
    let upload = uploads::receive_image(&mut multipart, &state.config.uploads).await?;

    let (interaction, cancel) = state.interactions.begin(session.id, upload.file_name(), &state.shutdown_token);
    info!(interaction_id = %interaction.id, file_name = %interaction.file_name, "Interaction started");

    Run {
        store: state.interactions.clone(),
        pipeline: state.pipeline.clone(),
        session: session.id,
        interaction_id: interaction.id,
        upload,
        cancel,
    }
    .spawn();

    Ok((
        StatusCode::ACCEPTED,
        SessionCookie::new(&session, &state.config.sessions),
        Json(interaction.into()),
    ))
}

/// Current state of the session's interaction
#[utoipa::path(
    get,
    path = "/interactions/current",
    tag = "interactions",
    summary = "Get current interaction",
    responses(
        (status = 200, description = "Snapshot of the most recent interaction, or `idle` if there is none", body = InteractionResponse),
    )
)]
#[instrument(skip(state), fields(session = %session.id))]
pub async fn get_current_interaction(State(state): State<AppState>, session: Session) -> (SessionCookie, Json<InteractionResponse>) {
    let response = state
        .interactions
        .current(session.id)
        .map(InteractionResponse::from)
        .unwrap_or_else(InteractionResponse::idle);

    (SessionCookie::new(&session, &state.config.sessions), Json(response))
}

/// Cancel the session's interaction
#[utoipa::path(
    delete,
    path = "/interactions/current",
    tag = "interactions",
    summary = "Cancel current interaction",
    description = "Stops a running interaction. Finished interactions are returned unchanged.",
    responses(
        (status = 200, description = "Interaction after cancellation", body = InteractionResponse),
        (status = 404, description = "The session has no interaction", body = crate::errors::ErrorBody),
    )
)]
#[instrument(skip(state), fields(session = %session.id))]
pub async fn cancel_current_interaction(State(state): State<AppState>, session: Session) -> Result<Json<InteractionResponse>> {
    let interaction = state.interactions.cancel(session.id).ok_or_else(|| Error::NotFound {
        resource: "Interaction".to_string(),
    })?;

    Ok(Json(interaction.into()))
}
