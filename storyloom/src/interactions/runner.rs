//! Background task that drives one interaction through both stages.

use std::{future::Future, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use super::{InteractionId, InteractionStore, SessionId, Update};
use crate::{
    inference::{InferenceError, Stage},
    pipeline::Pipeline,
    uploads::StoredUpload,
};

/// Everything a run needs; moved into the spawned task.
pub struct Run {
    pub store: Arc<InteractionStore>,
    pub pipeline: Arc<Pipeline>,
    pub session: SessionId,
    pub interaction_id: InteractionId,
    pub upload: StoredUpload,
    pub cancel: CancellationToken,
}

impl Run {
    /// Spawn the run onto the runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        let span = info_span!("interaction", interaction_id = %self.interaction_id, session = %self.session);
        tokio::spawn(self.execute().instrument(span))
    }

    /// Caption, then story. Every outcome is written back to the store, which discards it if the
    /// interaction has been replaced in the meantime. The upload is deleted once captioning ends.
    pub async fn execute(self) {
        let Run {
            store,
            pipeline,
            session,
            interaction_id,
            upload,
            cancel,
        } = self;
        let report = |update: Update| store.update(session, interaction_id, update);

        report(Update::CaptioningStarted);
        let caption = until_cancelled(&cancel, Stage::Captioning, pipeline.caption(upload.path())).await;
        drop(upload);

        let caption = match caption {
            Ok(caption) => caption,
            Err(e) => return finish_with_error(&report, e),
        };
        if !report(Update::CaptionReady(caption.clone())) {
            return;
        }

        report(Update::StorytellingStarted);
        match until_cancelled(&cancel, Stage::Storytelling, pipeline.story(&caption)).await {
            Ok(story) => {
                if report(Update::StoryReady(story)) {
                    info!("Interaction complete");
                }
            }
            Err(e) => finish_with_error(&report, e),
        }
    }
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    stage: Stage,
    fut: impl Future<Output = Result<T, InferenceError>>,
) -> Result<T, InferenceError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(InferenceError::Cancelled { stage }),
        result = fut => result,
    }
}

fn finish_with_error(report: &impl Fn(Update) -> bool, error: InferenceError) {
    match error {
        InferenceError::Cancelled { stage } => {
            info!(%stage, "Interaction cancelled");
            report(Update::Cancelled);
        }
        error => {
            warn!(error = %error, "Interaction failed");
            report(Update::Failed(error.user_message()));
        }
    }
}
