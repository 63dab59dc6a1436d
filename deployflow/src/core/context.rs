//! Per-run execution context.

use super::{PipelineEvent, RunEvent};
use crate::cancellation::CancellationToken;
use std::sync::Arc;
use uuid::Uuid;

/// Everything scoped to one pipeline run.
///
/// Cloned into every action task; nothing in here is shared between runs.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// The run identifier.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// Console link for this run, when a console base URL is configured.
    pub execution_url: Option<String>,
    /// Cancels the run at the next stage boundary and aborts canary bakes.
    pub cancel: Arc<CancellationToken>,
}

impl RunContext {
    /// Creates a context with a fresh run id.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            execution_url: None,
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the execution URL.
    #[must_use]
    pub fn with_execution_url(mut self, url: impl Into<String>) -> Self {
        self.execution_url = Some(url.into());
        self
    }

    /// Uses an externally owned cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Stamps `event` with this run.
    #[must_use]
    pub fn event(&self, event: PipelineEvent) -> RunEvent {
        RunEvent::new(self.run_id, self.pipeline.clone(), event)
    }
}
