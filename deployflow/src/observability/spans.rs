//! Span helpers for runs, stages and actions.

use crate::core::{ActionKind, RunContext};
use tokio::time::Instant;
use tracing::{info_span, Span};

/// Span covering a whole run.
#[must_use]
pub fn run_span(ctx: &RunContext) -> Span {
    info_span!("pipeline_run", pipeline = %ctx.pipeline, run_id = %ctx.run_id)
}

/// Span covering one stage.
#[must_use]
pub fn stage_span(ctx: &RunContext, stage: &str) -> Span {
    info_span!("stage", pipeline = %ctx.pipeline, run_id = %ctx.run_id, stage = %stage)
}

/// Span covering one action.
#[must_use]
pub fn action_span(ctx: &RunContext, stage: &str, action: &str, kind: ActionKind) -> Span {
    info_span!(
        "action",
        run_id = %ctx.run_id,
        stage = %stage,
        action = %action,
        kind = %kind,
    )
}

/// Simple span timing helper.
///
/// Uses the tokio clock so durations follow a paused test clock.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}
