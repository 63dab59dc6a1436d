//! Notification triggers and the events that carry them.

use crate::core::{ActionKind, RunContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// The kind of event a notification rule listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A source action failed.
    SourceFailed,
    /// A build action failed.
    BuildFailed,
    /// A deploy action failed.
    DeploymentFailed,
    /// An integration test action failed.
    IntegrationTestFailed,
    /// A canary release rolled back.
    CanaryRolledBack,
    /// A run ended in failure.
    PipelineFailed,
    /// A notify action asked for a notice.
    PipelineNotice,
}

/// The component that raises events of a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventProducer {
    /// The pipeline engine.
    Engine,
    /// The canary controller.
    CanaryController,
    /// A notify action.
    NotifyAction,
}

impl EventKind {
    /// Returns the only component that produces this kind.
    #[must_use]
    pub fn producer(self) -> EventProducer {
        match self {
            Self::SourceFailed
            | Self::BuildFailed
            | Self::DeploymentFailed
            | Self::IntegrationTestFailed
            | Self::PipelineFailed => EventProducer::Engine,
            Self::CanaryRolledBack => EventProducer::CanaryController,
            Self::PipelineNotice => EventProducer::NotifyAction,
        }
    }

    /// The kind raised when an action of `kind` fails.
    #[must_use]
    pub fn for_failed_action(kind: ActionKind) -> Option<Self> {
        match kind {
            ActionKind::Source => Some(Self::SourceFailed),
            ActionKind::Build => Some(Self::BuildFailed),
            ActionKind::Deploy => Some(Self::DeploymentFailed),
            ActionKind::IntegrationTest => Some(Self::IntegrationTestFailed),
            ActionKind::Notify => None,
        }
    }

    /// Returns the snake case name used in templates.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourceFailed => "source_failed",
            Self::BuildFailed => "build_failed",
            Self::DeploymentFailed => "deployment_failed",
            Self::IntegrationTestFailed => "integration_test_failed",
            Self::CanaryRolledBack => "canary_rolled_back",
            Self::PipelineFailed => "pipeline_failed",
            Self::PipelineNotice => "pipeline_notice",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One occurrence of a notifiable event.
///
/// `id` identifies the occurrence; the dispatcher fires at most once per id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Occurrence id.
    pub id: Uuid,
    /// What happened.
    pub kind: EventKind,
    /// The run this occurred in.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// Stage involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Action involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Human-readable cause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Console link for the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_url: Option<String>,
    /// The breached alarm, for canary rollbacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm: Option<String>,
    /// Candidate traffic share when the event fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_percent: Option<u8>,
    /// When it happened.
    pub occurred_at: DateTime<Utc>,
}

impl NotificationEvent {
    /// Creates an event of `kind` for the run in `ctx`.
    #[must_use]
    pub fn new(kind: EventKind, ctx: &RunContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            run_id: ctx.run_id,
            pipeline: ctx.pipeline.clone(),
            stage: None,
            action: None,
            reason: None,
            execution_url: ctx.execution_url.clone(),
            alarm: None,
            traffic_percent: None,
            occurred_at: Utc::now(),
        }
    }

    /// Sets the stage.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Sets the action.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Sets the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Sets the breached alarm.
    #[must_use]
    pub fn with_alarm(mut self, alarm: impl Into<String>) -> Self {
        self.alarm = Some(alarm.into());
        self
    }

    /// Sets the traffic share.
    #[must_use]
    pub fn with_traffic_percent(mut self, percent: u8) -> Self {
        self.traffic_percent = Some(percent);
        self
    }

    /// Values available to message templates, keyed by placeholder name.
    #[must_use]
    pub fn placeholders(&self) -> HashMap<&'static str, String> {
        let mut values = HashMap::new();
        values.insert("pipeline", self.pipeline.clone());
        values.insert("run_id", self.run_id.to_string());
        values.insert("kind", self.kind.to_string());
        values.insert("stage", self.stage.clone().unwrap_or_default());
        values.insert("action", self.action.clone().unwrap_or_default());
        values.insert("reason", self.reason.clone().unwrap_or_default());
        values.insert("execution_url", self.execution_url.clone().unwrap_or_default());
        values.insert("alarm", self.alarm.clone().unwrap_or_default());
        values.insert(
            "traffic_percent",
            self.traffic_percent.map(|p| p.to_string()).unwrap_or_default(),
        );
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_kind_has_one_producer() {
        assert_eq!(EventKind::CanaryRolledBack.producer(), EventProducer::CanaryController);
        assert_eq!(EventKind::IntegrationTestFailed.producer(), EventProducer::Engine);
        assert_eq!(EventKind::PipelineNotice.producer(), EventProducer::NotifyAction);
    }

    #[test]
    fn test_failed_action_kinds() {
        assert_eq!(EventKind::for_failed_action(ActionKind::Deploy), Some(EventKind::DeploymentFailed));
        assert_eq!(EventKind::for_failed_action(ActionKind::Notify), None);
    }

    #[test]
    fn test_event_from_context() {
        let ctx = RunContext::new("PipelineLab").with_execution_url("https://console/run/1");
        let event = NotificationEvent::new(EventKind::IntegrationTestFailed, &ctx)
            .with_stage("Test")
            .with_action("IntegrationTests");

        assert_eq!(event.run_id, ctx.run_id);
        let values = event.placeholders();
        assert_eq!(values["execution_url"], "https://console/run/1");
        assert_eq!(values["stage"], "Test");
        assert_eq!(values["alarm"], "");
        assert_eq!(values["kind"], "integration_test_failed");
    }

    #[test]
    fn test_two_events_have_distinct_ids() {
        let ctx = RunContext::new("p");
        let a = NotificationEvent::new(EventKind::PipelineFailed, &ctx);
        let b = NotificationEvent::new(EventKind::PipelineFailed, &ctx);
        assert_ne!(a.id, b.id);
    }
}
