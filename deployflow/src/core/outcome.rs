//! Per-action, per-stage and per-run outcome records.

use super::{ActionKind, ActionStatus, Artifact, PipelineStatus, StageStatus};
use crate::canary::CanaryReport;
use crate::errors::ExecutionError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The recorded outcome of one action in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// The action name.
    pub action: String,
    /// The action kind.
    pub kind: ActionKind,
    /// The run order the action was scheduled in.
    pub run_order: u32,
    /// Final (or current) status.
    pub status: ActionStatus,
    /// The artifact produced, if the action declares an output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    /// Named outputs exposed to later actions (e.g. a service endpoint).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub outputs: HashMap<String, String>,
    /// The failure, when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    /// Canary summary for deploy actions that ran a canary release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary: Option<CanaryReport>,
    /// Wall time spent running the action.
    #[serde(default)]
    pub duration_ms: f64,
}

impl ActionOutcome {
    /// Creates a pending outcome for an action that has not started.
    #[must_use]
    pub fn pending(action: impl Into<String>, kind: ActionKind, run_order: u32) -> Self {
        Self {
            action: action.into(),
            kind,
            run_order,
            status: ActionStatus::Pending,
            artifact: None,
            outputs: HashMap::new(),
            error: None,
            canary: None,
            duration_ms: 0.0,
        }
    }

    /// Marks the outcome succeeded.
    #[must_use]
    pub fn succeeded(mut self) -> Self {
        self.status = ActionStatus::Succeeded;
        self.error = None;
        self
    }

    /// Marks the outcome failed with the given error.
    #[must_use]
    pub fn failed(mut self, error: ExecutionError) -> Self {
        self.status = ActionStatus::Failed;
        self.error = Some(error);
        self
    }

    /// Records the produced artifact.
    #[must_use]
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    /// Records named outputs.
    #[must_use]
    pub fn with_outputs(mut self, outputs: HashMap<String, String>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Records a canary summary.
    #[must_use]
    pub fn with_canary(mut self, report: CanaryReport) -> Self {
        self.canary = Some(report);
        self
    }

    /// Records the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Returns true if the action succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// The recorded outcome of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// The stage name.
    pub stage: String,
    /// Whether every action succeeded.
    pub status: StageStatus,
    /// Every action of the stage, including ones that never started.
    pub actions: Vec<ActionOutcome>,
    /// Wall time spent in the stage.
    pub duration_ms: f64,
}

impl StageOutcome {
    /// Looks up one action outcome by name.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionOutcome> {
        self.actions.iter().find(|a| a.action == name)
    }

    /// Returns the first failed action, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<&ActionOutcome> {
        self.actions.iter().find(|a| a.status == ActionStatus::Failed)
    }
}

/// Where and why a run failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    /// The failing stage.
    pub stage: String,
    /// The failing action.
    pub action: String,
    /// Why the action failed.
    pub reason: String,
    /// The breached alarm, for canary rollbacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm: Option<String>,
    /// Candidate traffic percentage at the moment of the breach.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_percent: Option<u8>,
}

impl FailureReport {
    /// Builds a report from a failed action outcome.
    #[must_use]
    pub fn from_action(stage: &str, outcome: &ActionOutcome) -> Self {
        let reason = outcome
            .error
            .as_ref()
            .map_or_else(|| "unknown failure".to_string(), |e| e.message.clone());
        let breach = outcome.canary.as_ref().and_then(|c| c.breach.as_ref());

        Self {
            stage: stage.to_string(),
            action: outcome.action.clone(),
            reason,
            alarm: breach.map(|b| b.alarm.clone()),
            traffic_percent: breach.map(|b| b.traffic_percent),
        }
    }
}

/// The final result of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    /// The run identifier.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// Overall status.
    pub status: PipelineStatus,
    /// Outcomes of every stage that started, in order.
    pub stages: Vec<StageOutcome>,
    /// Where the run failed, when it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
    /// Total wall time.
    pub duration_ms: f64,
}

impl PipelineOutcome {
    /// Returns true if the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Succeeded
    }

    /// Looks up a stage outcome by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == name)
    }

    /// Looks up an action outcome by stage and action name.
    #[must_use]
    pub fn action(&self, stage: &str, action: &str) -> Option<&ActionOutcome> {
        self.stage(stage).and_then(|s| s.action(action))
    }

    /// Returns the names of the stages that started, in order.
    #[must_use]
    pub fn started_stages(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.stage.as_str()).collect()
    }
}
