//! The pipeline execution engine.
//!
//! Stages run strictly in sequence. Inside a stage, actions are grouped by
//! run order; every action of a group runs as its own tokio task and the
//! whole group finishes before the next one starts. The first failed group
//! halts the stage, and a failed stage halts the run.

use super::{Pipeline, RunOrderGroup, StageSpec};
use crate::actions::{ActionExecutor, ArtifactBindings};
use crate::cancellation::CancellationToken;
use crate::canary::CanaryController;
use crate::config::EngineConfig;
use crate::core::{
    ActionOutcome, ActionStatus, FailureReport, PipelineEvent, PipelineOutcome, PipelineStatus, RunContext,
    StageOutcome, StageStatus,
};
use crate::errors::{ExecutionError, ExecutionErrorKind};
use crate::events::{EventSink, LoggingEventSink};
use crate::health::HealthMonitor;
use crate::notifications::{EventKind, NotificationDispatcher, NotificationEvent, NotificationRule};
use crate::observability::{action_span, run_span, stage_span, SpanTimer};
use crate::ports::{Backends, SubscriberChannel};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn, Instrument, Level};

/// Assembles a [`PipelineEngine`].
pub struct EngineBuilder {
    backends: Backends,
    channel: Arc<dyn SubscriberChannel>,
    rules: Vec<NotificationRule>,
    sink: Option<Arc<dyn EventSink>>,
    config: EngineConfig,
}

impl EngineBuilder {
    /// Adds a notification rule.
    #[must_use]
    pub fn with_rule(mut self, rule: NotificationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Adds several notification rules.
    #[must_use]
    pub fn with_rules(mut self, rules: impl IntoIterator<Item = NotificationRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Sets the event sink. Defaults to a [`LoggingEventSink`].
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Wires the dispatcher, health monitor, canary controller and executor.
    #[must_use]
    pub fn build(self) -> PipelineEngine {
        let sink = self.sink.unwrap_or_else(|| {
            let level = if self.config.event_log_level == "debug" {
                Level::DEBUG
            } else {
                Level::INFO
            };
            Arc::new(LoggingEventSink::new(level))
        });

        let dispatcher = Arc::new(NotificationDispatcher::new(self.rules, self.channel, sink.clone()));
        let canary = Arc::new(CanaryController::new(
            self.backends.traffic.clone(),
            HealthMonitor::new(self.backends.metrics.clone()),
            dispatcher.clone(),
            sink.clone(),
            self.config.canary_poll_interval,
        ));
        let executor = Arc::new(ActionExecutor::new(self.backends, canary, dispatcher.clone()));
        let limiter = self
            .config
            .max_parallel_actions
            .map(|max| Arc::new(Semaphore::new(max.max(1))));

        PipelineEngine {
            executor,
            dispatcher,
            sink,
            limiter,
            config: self.config,
        }
    }
}

/// Runs validated pipelines.
///
/// An engine holds no per-run state; any number of runs may share it.
pub struct PipelineEngine {
    executor: Arc<ActionExecutor>,
    dispatcher: Arc<NotificationDispatcher>,
    sink: Arc<dyn EventSink>,
    limiter: Option<Arc<Semaphore>>,
    config: EngineConfig,
}

impl PipelineEngine {
    /// Starts building an engine over `backends`, delivering notifications through `channel`.
    #[must_use]
    pub fn builder(backends: Backends, channel: Arc<dyn SubscriberChannel>) -> EngineBuilder {
        EngineBuilder {
            backends,
            channel,
            rules: Vec::new(),
            sink: None,
            config: EngineConfig::default(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the notification dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Runs `pipeline` to completion.
    pub async fn run(&self, pipeline: &Pipeline) -> PipelineOutcome {
        self.run_with_cancel(pipeline, Arc::new(CancellationToken::new())).await
    }

    /// Runs `pipeline`, stopping at the next stage boundary once `cancel` fires.
    pub async fn run_with_cancel(&self, pipeline: &Pipeline, cancel: Arc<CancellationToken>) -> PipelineOutcome {
        let mut ctx = RunContext::new(pipeline.name()).with_cancel(cancel);
        if let Some(url) = self.config.execution_url(pipeline.name(), ctx.run_id) {
            ctx = ctx.with_execution_url(url);
        }
        let run_id = ctx.run_id;
        let span = run_span(&ctx);
        let outcome = self.execute_run(pipeline, ctx).instrument(span).await;
        self.dispatcher.finish_run(run_id);
        outcome
    }

    async fn execute_run(&self, pipeline: &Pipeline, ctx: RunContext) -> PipelineOutcome {
        let timer = SpanTimer::start(pipeline.name());
        info!(stages = pipeline.stages().len(), actions = pipeline.action_count(), "Pipeline run started");
        self.sink
            .emit(ctx.event(PipelineEvent::PipelineStarted {
                stage_count: pipeline.stages().len(),
            }))
            .await;

        let mut bindings = ArtifactBindings::new();
        let mut stages = Vec::with_capacity(pipeline.stages().len());
        let mut status = PipelineStatus::Succeeded;
        let mut failure = None;

        for stage in pipeline.stages() {
            if ctx.cancel.is_cancelled() {
                info!(
                    stage = %stage.name,
                    reason = %ctx.cancel.reason().unwrap_or_default(),
                    "Run cancelled before stage"
                );
                status = PipelineStatus::Cancelled;
                break;
            }

            let outcome = self
                .run_stage(stage, &mut bindings, &ctx)
                .instrument(stage_span(&ctx, &stage.name))
                .await;

            if outcome.status == StageStatus::Failed {
                self.notify_failures(&outcome, &ctx).await;
                let report = outcome.first_failure().map(|a| FailureReport::from_action(&stage.name, a));
                if let Some(report) = &report {
                    self.notify_pipeline_failed(report, &ctx).await;
                }
                failure = report;
                status = PipelineStatus::Failed;
                stages.push(outcome);
                break;
            }
            stages.push(outcome);
        }

        let duration_ms = timer.finish();
        self.sink
            .emit(ctx.event(PipelineEvent::PipelineCompleted { status, duration_ms }))
            .await;

        match &failure {
            Some(report) => warn!(
                status = %status,
                stage = %report.stage,
                action = %report.action,
                reason = %report.reason,
                duration_ms,
                "Pipeline run finished"
            ),
            None => info!(status = %status, duration_ms, "Pipeline run finished"),
        }

        PipelineOutcome {
            run_id: ctx.run_id,
            pipeline: pipeline.name().to_string(),
            status,
            stages,
            failure,
            duration_ms,
        }
    }

    async fn run_stage(&self, stage: &StageSpec, bindings: &mut ArtifactBindings, ctx: &RunContext) -> StageOutcome {
        let timer = SpanTimer::start(&stage.name);
        self.sink
            .emit(ctx.event(PipelineEvent::StageStarted {
                stage: stage.name.clone(),
            }))
            .await;

        let mut finished: HashMap<String, ActionOutcome> = HashMap::new();
        let mut halted = false;

        for group in stage.run_order_groups() {
            for outcome in self.run_group(stage, &group, bindings, ctx).await {
                if outcome.is_success() {
                    bindings.absorb(&outcome);
                } else {
                    halted = true;
                }
                finished.insert(outcome.action.clone(), outcome);
            }
            if halted {
                break;
            }
        }

        let actions: Vec<ActionOutcome> = stage
            .actions
            .iter()
            .map(|a| {
                finished
                    .remove(&a.name)
                    .unwrap_or_else(|| ActionOutcome::pending(&a.name, a.kind(), a.run_order))
            })
            .collect();
        let status = if halted { StageStatus::Failed } else { StageStatus::Succeeded };
        let duration_ms = timer.finish();

        self.sink
            .emit(ctx.event(PipelineEvent::StageCompleted {
                stage: stage.name.clone(),
                status,
                duration_ms,
            }))
            .await;
        info!(stage = %stage.name, status = %status, duration_ms, "Stage finished");

        StageOutcome {
            stage: stage.name.clone(),
            status,
            actions,
            duration_ms,
        }
    }

    /// Runs one run-order group and waits for every action in it.
    async fn run_group(
        &self,
        stage: &StageSpec,
        group: &RunOrderGroup<'_>,
        bindings: &ArtifactBindings,
        ctx: &RunContext,
    ) -> Vec<ActionOutcome> {
        let mut tasks = FuturesUnordered::new();

        for spec in &group.actions {
            let action = (*spec).clone();
            let stage_name = stage.name.clone();
            let snapshot = bindings.clone();
            let run = ctx.clone();
            let executor = self.executor.clone();
            let sink = self.sink.clone();
            let limiter = self.limiter.clone();
            let span = action_span(ctx, &stage.name, &action.name, action.kind());
            let fallback = ActionOutcome::pending(&action.name, action.kind(), action.run_order);

            let handle = tokio::spawn(
                async move {
                    let _permit = match limiter {
                        Some(semaphore) => semaphore.acquire_owned().await.ok(),
                        None => None,
                    };
                    sink.emit(run.event(PipelineEvent::ActionStarted {
                        stage: stage_name.clone(),
                        action: action.name.clone(),
                        kind: action.kind(),
                        run_order: action.run_order,
                    }))
                    .await;

                    let outcome = executor.execute(&stage_name, &action, &snapshot, &run).await;

                    sink.emit(run.event(PipelineEvent::ActionCompleted {
                        stage: stage_name,
                        outcome: Box::new(outcome.clone()),
                    }))
                    .await;
                    outcome
                }
                .instrument(span),
            );
            tasks.push(async move { (fallback, handle.await) });
        }

        let mut outcomes = Vec::with_capacity(group.actions.len());
        while let Some((fallback, joined)) = tasks.next().await {
            let outcome = joined.unwrap_or_else(|err| {
                warn!(action = %fallback.action, error = %err, "Action task aborted");
                let message = format!("action task did not complete: {err}");
                let error = ExecutionError::new(&fallback.action, ExecutionErrorKind::Internal, message);
                fallback.failed(error)
            });
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn notify_failures(&self, stage: &StageOutcome, ctx: &RunContext) {
        for failed in stage.actions.iter().filter(|a| a.status == ActionStatus::Failed) {
            let Some(kind) = EventKind::for_failed_action(failed.kind) else {
                continue;
            };
            let report = FailureReport::from_action(&stage.stage, failed);
            self.dispatcher.on(&failure_event(kind, &report, ctx)).await;
        }
    }

    async fn notify_pipeline_failed(&self, report: &FailureReport, ctx: &RunContext) {
        self.dispatcher
            .on(&failure_event(EventKind::PipelineFailed, report, ctx))
            .await;
    }
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn failure_event(kind: EventKind, report: &FailureReport, ctx: &RunContext) -> NotificationEvent {
    let mut event = NotificationEvent::new(kind, ctx)
        .with_stage(&report.stage)
        .with_action(&report.action)
        .with_reason(&report.reason);
    if let Some(alarm) = &report.alarm {
        event = event.with_alarm(alarm);
    }
    if let Some(percent) = report.traffic_percent {
        event = event.with_traffic_percent(percent);
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::pipeline::{ActionSpec, PipelineBuilder};
    use crate::testing::{MockBackends, RecordingChannel};
    use pretty_assertions::assert_eq;

    fn engine(mocks: &MockBackends, sink: Arc<CollectingEventSink>) -> PipelineEngine {
        PipelineEngine::builder(mocks.backends(), Arc::new(RecordingChannel::new()))
            .with_sink(sink)
            .build()
    }

    fn notices(stages: &[&str]) -> Pipeline {
        stages
            .iter()
            .fold(PipelineBuilder::new("notices"), |builder, name| {
                builder
                    .stage(StageSpec::new(*name).with_action(ActionSpec::notify(format!("{name}Notice"), "hello")))
                    .unwrap()
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_successful_run_emits_lifecycle() {
        let mocks = MockBackends::new();
        let sink = Arc::new(CollectingEventSink::new());
        let outcome = engine(&mocks, sink.clone()).run(&notices(&["One", "Two"])).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.started_stages(), vec!["One", "Two"]);
        assert_eq!(
            sink.event_types(),
            vec![
                "pipeline.started",
                "stage.started",
                "action.started",
                "action.completed",
                "stage.completed",
                "stage.started",
                "action.started",
                "action.completed",
                "stage.completed",
                "pipeline.completed",
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_stage_succeeds() {
        let mocks = MockBackends::new();
        let pipeline = PipelineBuilder::new("p")
            .stage(StageSpec::new("Empty"))
            .unwrap()
            .build()
            .unwrap();

        let outcome = engine(&mocks, Arc::new(CollectingEventSink::new())).run(&pipeline).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.stage("Empty").unwrap().status, StageStatus::Succeeded);
        assert!(outcome.stage("Empty").unwrap().actions.is_empty());
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_starts_nothing() {
        let mocks = MockBackends::new();
        let cancel = Arc::new(CancellationToken::new());
        cancel.cancel("freeze window");

        let outcome = engine(&mocks, Arc::new(CollectingEventSink::new()))
            .run_with_cancel(&notices(&["One"]), cancel)
            .await;

        assert_eq!(outcome.status, PipelineStatus::Cancelled);
        assert!(outcome.stages.is_empty());
        assert!(outcome.failure.is_none());
    }

    #[tokio::test]
    async fn test_runs_get_fresh_ids() {
        let mocks = MockBackends::new();
        let engine = engine(&mocks, Arc::new(CollectingEventSink::new()));
        let pipeline = notices(&["One"]);

        let first = engine.run(&pipeline).await;
        let second = engine.run(&pipeline).await;
        assert_ne!(first.run_id, second.run_id);
    }

    #[test]
    fn test_default_sink_follows_config() {
        let mocks = MockBackends::new();
        let engine = PipelineEngine::builder(mocks.backends(), Arc::new(RecordingChannel::new()))
            .with_config(EngineConfig::new().with_max_parallel_actions(2))
            .build();
        assert_eq!(engine.config().max_parallel_actions, Some(2));
        assert!(engine.dispatcher().rules().is_empty());
    }

    #[tokio::test]
    async fn test_zero_parallelism_from_config_file_still_runs() {
        let mocks = MockBackends::new();
        let config: EngineConfig = serde_json::from_str(r#"{"max_parallel_actions":0}"#).unwrap();
        let engine = PipelineEngine::builder(mocks.backends(), Arc::new(RecordingChannel::new()))
            .with_sink(Arc::new(CollectingEventSink::new()))
            .with_config(config)
            .build();

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), engine.run(&notices(&["One"])))
            .await
            .expect("run should not block on a zero-permit limiter");

        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_dispatch_record_released_after_run() {
        let mocks = MockBackends::new();
        let engine = engine(&mocks, Arc::new(CollectingEventSink::new()));

        engine.run(&notices(&["One", "Two"])).await;
        engine.run(&notices(&["One"])).await;

        assert_eq!(engine.dispatcher().tracked_runs(), 0);
    }
}
