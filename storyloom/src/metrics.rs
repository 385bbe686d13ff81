//! Stage-level metrics, recorded through the `metrics` facade.
//!
//! When `enable_metrics` is off no recorder is installed and these calls are no-ops.

use std::time::{Duration, Instant};

use crate::inference::{InferenceError, Stage};

/// How a finished stage call ended, used as the `outcome` label
pub fn outcome_label<T>(result: &Result<T, InferenceError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(InferenceError::Timeout { .. }) => "timeout",
        Err(_) => "error",
    }
}

pub fn record_stage(stage: Stage, outcome: &'static str, elapsed: Duration) {
    metrics::counter!("storyloom_stage_total", "stage" => stage.as_str(), "outcome" => outcome).increment(1);
    metrics::histogram!("storyloom_stage_duration_seconds", "stage" => stage.as_str()).record(elapsed.as_secs_f64());
}

/// Times one stage call. A timer dropped before [`StageTimer::finish`] means the call's future was
/// dropped mid-flight (run cancelled, client disconnected) and is recorded as `cancelled`.
pub struct StageTimer {
    stage: Stage,
    started: Instant,
    finished: bool,
}

impl StageTimer {
    pub fn start(stage: Stage) -> Self {
        Self {
            stage,
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn finish<T>(mut self, result: &Result<T, InferenceError>) {
        self.finished = true;
        record_stage(self.stage, outcome_label(result), self.started.elapsed());
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        if !self.finished {
            record_stage(self.stage, "cancelled", self.started.elapsed());
        }
    }
}
