//! Run events emitted for observability.

use super::{ActionKind, ActionOutcome, PipelineStatus, StageStatus};
use crate::canary::CanaryPhase;
use crate::notifications::EventKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Something observable that happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The run started.
    PipelineStarted {
        /// Number of stages in the pipeline.
        stage_count: usize,
    },
    /// A stage started.
    StageStarted {
        /// The stage name.
        stage: String,
    },
    /// A stage reached a terminal status.
    StageCompleted {
        /// The stage name.
        stage: String,
        /// The stage status.
        status: StageStatus,
        /// Time spent in the stage.
        duration_ms: f64,
    },
    /// An action started.
    ActionStarted {
        /// The owning stage.
        stage: String,
        /// The action name.
        action: String,
        /// The action kind.
        kind: ActionKind,
        /// The run-order group.
        run_order: u32,
    },
    /// An action reached a terminal status.
    ActionCompleted {
        /// The owning stage.
        stage: String,
        /// The recorded outcome.
        outcome: Box<ActionOutcome>,
    },
    /// A canary release moved to a new phase.
    CanaryPhaseChanged {
        /// The deployable unit being released.
        target: String,
        /// The new phase.
        phase: CanaryPhase,
        /// Candidate traffic weight after the transition.
        traffic_percent: u8,
    },
    /// A canary release was rolled back.
    CanaryRolledBack {
        /// The deployable unit being released.
        target: String,
        /// The breached alarm, when a breach caused the rollback.
        alarm: Option<String>,
        /// Candidate traffic weight when the rollback started.
        traffic_percent: u8,
    },
    /// A notification reached a subscriber.
    NotificationSent {
        /// The rule that fired.
        rule: String,
        /// The trigger kind.
        trigger: EventKind,
        /// The subscriber address.
        subscriber: String,
    },
    /// The run finished.
    PipelineCompleted {
        /// The final status.
        status: PipelineStatus,
        /// Total wall time.
        duration_ms: f64,
    },
}

impl PipelineEvent {
    /// Returns the dotted event type used in logs (e.g. "stage.started").
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PipelineStarted { .. } => "pipeline.started",
            Self::StageStarted { .. } => "stage.started",
            Self::StageCompleted { .. } => "stage.completed",
            Self::ActionStarted { .. } => "action.started",
            Self::ActionCompleted { .. } => "action.completed",
            Self::CanaryPhaseChanged { .. } => "canary.phase_changed",
            Self::CanaryRolledBack { .. } => "canary.rolled_back",
            Self::NotificationSent { .. } => "notification.sent",
            Self::PipelineCompleted { .. } => "pipeline.completed",
        }
    }
}

/// An event stamped with the run it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Unique id of this event.
    pub event_id: Uuid,
    /// The run that produced it.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// The payload.
    #[serde(flatten)]
    pub event: PipelineEvent,
}

impl RunEvent {
    /// Stamps an event for the given run.
    #[must_use]
    pub fn new(run_id: Uuid, pipeline: impl Into<String>, event: PipelineEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            run_id,
            pipeline: pipeline.into(),
            timestamp: Utc::now(),
            event,
        }
    }

    /// Returns the dotted event type.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }
}
