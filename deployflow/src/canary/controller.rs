//! The canary release state machine.

use super::{AlarmBreach, CanaryPhase, CanaryPolicy, CanaryRelease, CanaryReport, TrafficStep};
use crate::core::{PipelineEvent, RunContext};
use crate::events::EventSink;
use crate::health::HealthMonitor;
use crate::notifications::{EventKind, NotificationDispatcher, NotificationEvent};
use crate::ports::TrafficRouter;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lower bound on the alarm poll interval.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What to release and where it came from.
#[derive(Debug, Clone, Copy)]
pub struct CanaryRequest<'a> {
    /// The stage of the deploy action.
    pub stage: &'a str,
    /// The deploy action.
    pub action: &'a str,
    /// The freshly deployed revision.
    pub candidate: &'a str,
    /// The release policy.
    pub policy: &'a CanaryPolicy,
}

enum BakeResult {
    Healthy,
    Breached(AlarmBreach),
    Cancelled(String),
}

/// Drives canary releases through the traffic router.
///
/// One controller can serve any number of concurrent releases; all
/// per-release state lives in a [`CanaryRelease`].
pub struct CanaryController {
    router: Arc<dyn TrafficRouter>,
    monitor: HealthMonitor,
    dispatcher: Arc<NotificationDispatcher>,
    sink: Arc<dyn EventSink>,
    poll_interval: Duration,
}

impl CanaryController {
    /// Creates a controller. `poll_interval` applies to policies without their own.
    #[must_use]
    pub fn new(
        router: Arc<dyn TrafficRouter>,
        monitor: HealthMonitor,
        dispatcher: Arc<NotificationDispatcher>,
        sink: Arc<dyn EventSink>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            router,
            monitor,
            dispatcher,
            sink,
            poll_interval,
        }
    }

    /// Runs a release to a terminal phase and returns its report.
    pub async fn release(&self, request: CanaryRequest<'_>, ctx: &RunContext) -> CanaryReport {
        let policy = request.policy;
        let target = policy.target.as_str();
        let mut release = CanaryRelease::new(target, request.candidate, policy.schedule.clone());
        self.emit_phase(ctx, &release).await;

        info!(
            alias = %target,
            candidate = %request.candidate,
            steps = policy.schedule.len(),
            "Canary release started"
        );

        match self.router.current_revision(target).await {
            Ok(baseline) => release.baseline_revision = Some(baseline),
            Err(err) => {
                return self
                    .roll_back(&mut release, request, ctx, None, format!("baseline lookup failed: {err}"))
                    .await;
            }
        }

        if let Err(err) = self.router.register_candidate(target, request.candidate).await {
            return self
                .roll_back(&mut release, request, ctx, None, format!("candidate registration failed: {err}"))
                .await;
        }

        for (index, step) in policy.schedule.steps().iter().enumerate() {
            release.transition(CanaryPhase::Shifting(index), release.traffic_percent);
            if let Err(err) = self.router.set_candidate_weight(target, step.percent).await {
                self.emit_phase(ctx, &release).await;
                return self
                    .roll_back(&mut release, request, ctx, None, format!("traffic shift failed: {err}"))
                    .await;
            }
            release.set_traffic(step.percent);
            self.emit_phase(ctx, &release).await;

            release.transition(CanaryPhase::Baking(index), step.percent);
            self.emit_phase(ctx, &release).await;

            match self.bake(index, step, policy, ctx).await {
                BakeResult::Healthy => {}
                BakeResult::Breached(breach) => {
                    let reason = format!("alarm {} breached at {}% traffic", breach.alarm, breach.traffic_percent);
                    return self.roll_back(&mut release, request, ctx, Some(breach), reason).await;
                }
                BakeResult::Cancelled(reason) => {
                    return self
                        .roll_back(&mut release, request, ctx, None, format!("cancelled: {reason}"))
                        .await;
                }
            }
        }

        if let Err(err) = self.router.promote(target, request.candidate).await {
            return self
                .roll_back(&mut release, request, ctx, None, format!("promotion failed: {err}"))
                .await;
        }
        release.transition(CanaryPhase::Promoted, 100);
        self.emit_phase(ctx, &release).await;
        info!(alias = %target, candidate = %request.candidate, "Canary promoted");

        release.report(None, None)
    }

    /// Holds one step, polling every alarm until the hold elapses.
    async fn bake(&self, index: usize, step: &TrafficStep, policy: &CanaryPolicy, ctx: &RunContext) -> BakeResult {
        let interval = policy.poll_interval.unwrap_or(self.poll_interval).max(MIN_POLL_INTERVAL);
        let deadline = Instant::now() + step.hold;

        loop {
            if ctx.cancel.is_cancelled() {
                return BakeResult::Cancelled(ctx.cancel.reason().unwrap_or_default());
            }

            for rule in &policy.alarms {
                let evaluation = self.monitor.evaluate_detailed(rule, Utc::now()).await;
                if evaluation.state.is_breaching() {
                    warn!(
                        alias = %policy.target,
                        alarm = %rule.name,
                        observed = ?evaluation.observed,
                        traffic_percent = step.percent,
                        "Canary alarm breached"
                    );
                    return BakeResult::Breached(AlarmBreach {
                        alarm: rule.name.clone(),
                        metric: rule.metric.clone(),
                        observed: evaluation.observed,
                        threshold: rule.threshold,
                        traffic_percent: step.percent,
                        step: index,
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(alias = %policy.target, step = index, "Bake complete");
                return BakeResult::Healthy;
            }

            let wait = interval.min(deadline - now);
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = ctx.cancel.cancelled() => {
                    return BakeResult::Cancelled(ctx.cancel.reason().unwrap_or_default());
                }
            }
        }
    }

    async fn roll_back(
        &self,
        release: &mut CanaryRelease,
        request: CanaryRequest<'_>,
        ctx: &RunContext,
        breach: Option<AlarmBreach>,
        reason: String,
    ) -> CanaryReport {
        let at_percent = release.traffic_percent;
        release.transition(CanaryPhase::RollingBack, at_percent);
        self.emit_phase(ctx, release).await;
        warn!(alias = %release.target, reason = %reason, traffic_percent = at_percent, "Canary rolling back");

        if let Some(baseline) = release.baseline_revision.clone() {
            if let Err(err) = self.router.reset(&release.target, &baseline).await {
                error!(alias = %release.target, error = %err, "Traffic reset failed");
            }
        }

        self.sink
            .emit(ctx.event(PipelineEvent::CanaryRolledBack {
                target: release.target.clone(),
                alarm: breach.as_ref().map(|b| b.alarm.clone()),
                traffic_percent: at_percent,
            }))
            .await;

        let mut notice = NotificationEvent::new(EventKind::CanaryRolledBack, ctx)
            .with_stage(request.stage)
            .with_action(request.action)
            .with_reason(reason.clone())
            .with_traffic_percent(at_percent);
        if let Some(breach) = &breach {
            notice = notice.with_alarm(breach.alarm.clone());
        }
        self.dispatcher.on(&notice).await;

        release.transition(CanaryPhase::RolledBack, 0);
        self.emit_phase(ctx, release).await;

        let rollback_reason = if breach.is_some() { None } else { Some(reason) };
        release.report(breach, rollback_reason)
    }

    async fn emit_phase(&self, ctx: &RunContext, release: &CanaryRelease) {
        self.sink
            .emit(ctx.event(PipelineEvent::CanaryPhaseChanged {
                target: release.target.clone(),
                phase: release.phase,
                traffic_percent: release.traffic_percent,
            }))
            .await;
    }
}

impl std::fmt::Debug for CanaryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanaryController")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canary::TrafficShiftSchedule;
    use crate::events::CollectingEventSink;
    use crate::health::AlarmRule;
    use crate::notifications::{NotificationRule, Subscriber};
    use crate::testing::{RecordingChannel, RecordingTrafficRouter, ScriptedMetrics};
    use pretty_assertions::assert_eq;

    struct Harness {
        controller: CanaryController,
        router: Arc<RecordingTrafficRouter>,
        metrics: Arc<ScriptedMetrics>,
        channel: Arc<RecordingChannel>,
        sink: Arc<CollectingEventSink>,
    }

    fn harness() -> Harness {
        let router = Arc::new(RecordingTrafficRouter::new("1"));
        let metrics = Arc::new(ScriptedMetrics::new());
        let channel = Arc::new(RecordingChannel::new());
        let sink = Arc::new(CollectingEventSink::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            vec![NotificationRule::new("rollbacks", EventKind::CanaryRolledBack)
                .with_subscriber(Subscriber::email("ops@example.com"))],
            channel.clone(),
            sink.clone(),
        ));
        let controller = CanaryController::new(
            router.clone(),
            HealthMonitor::new(metrics.clone()),
            dispatcher,
            sink.clone(),
            Duration::from_secs(60),
        );
        Harness {
            controller,
            router,
            metrics,
            channel,
            sink,
        }
    }

    fn three_step_policy() -> CanaryPolicy {
        CanaryPolicy::new(
            "ServiceAlias",
            TrafficShiftSchedule::new(vec![
                TrafficStep::new(10, Duration::from_secs(300)),
                TrafficStep::new(50, Duration::from_secs(300)),
                TrafficStep::new(100, Duration::from_secs(300)),
            ]),
        )
        .with_alarm(AlarmRule::server_errors("Prod"))
    }

    fn request(policy: &CanaryPolicy) -> CanaryRequest<'_> {
        CanaryRequest {
            stage: "Prod",
            action: "ServiceUpdate",
            candidate: "2",
            policy,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_release_promotes() {
        let h = harness();
        h.metrics.set_constant("5XXError", 0.0);
        let policy = three_step_policy();

        let report = h.controller.release(request(&policy), &RunContext::new("p")).await;

        assert!(report.is_promoted());
        assert_eq!(report.traffic_percent, 100);
        assert_eq!(report.baseline_revision.as_deref(), Some("1"));
        assert_eq!(
            report.phases,
            vec![
                CanaryPhase::Initializing,
                CanaryPhase::Shifting(0),
                CanaryPhase::Baking(0),
                CanaryPhase::Shifting(1),
                CanaryPhase::Baking(1),
                CanaryPhase::Shifting(2),
                CanaryPhase::Baking(2),
                CanaryPhase::Promoted,
            ]
        );
        assert_eq!(h.router.weights(), vec![10, 50, 100]);
        assert_eq!(h.router.promoted(), vec!["2".to_string()]);
        // Five polls per five minute step at a one minute interval, plus one at the deadline.
        assert_eq!(h.metrics.sample_count("5XXError"), 18);
        assert!(h.channel.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_breach_rolls_back() {
        let h = harness();
        h.metrics.set_constant("5XXError", 2.0);
        let policy = three_step_policy();

        let report = h.controller.release(request(&policy), &RunContext::new("p")).await;

        assert_eq!(report.phase, CanaryPhase::RolledBack);
        assert_eq!(report.traffic_percent, 0);
        let breach = report.breach.unwrap();
        assert_eq!(breach.alarm, "ServiceErrorAlarmProd");
        assert_eq!(breach.traffic_percent, 10);
        assert_eq!(breach.step, 0);
        assert_eq!(h.router.resets(), vec!["1".to_string()]);
        assert!(h.router.promoted().is_empty());

        let sent = h.channel.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.body.contains("ServiceErrorAlarmProd"));
        assert_eq!(h.sink.events_of_type("canary.rolled_back").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breach_during_second_step() {
        let h = harness();
        // Six healthy polls cover the first step, then errors appear.
        h.metrics.script("5XXError", vec![Some(0.0); 6].into_iter().chain([Some(3.0)]).collect());
        let policy = three_step_policy();

        let report = h.controller.release(request(&policy), &RunContext::new("p")).await;

        let breach = report.breach.unwrap();
        assert_eq!(breach.step, 1);
        assert_eq!(breach.traffic_percent, 50);
        assert_eq!(h.router.weights(), vec![10, 50]);
        assert!(report.phases.ends_with(&[CanaryPhase::RollingBack, CanaryPhase::RolledBack]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_router_failure_rolls_back() {
        let h = harness();
        h.router.fail_weight_at(50);
        let policy = three_step_policy();

        let report = h.controller.release(request(&policy), &RunContext::new("p")).await;

        assert_eq!(report.phase, CanaryPhase::RolledBack);
        assert!(report.breach.is_none());
        assert!(report.rollback_reason.unwrap().contains("traffic shift failed"));
        assert_eq!(h.router.resets(), vec!["1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_bake_rolls_back() {
        let h = harness();
        let policy = three_step_policy();
        let ctx = RunContext::new("p");

        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(90)).await;
            cancel.cancel("operator abort");
        });

        let report = h.controller.release(request(&policy), &ctx).await;

        assert_eq!(report.phase, CanaryPhase::RolledBack);
        assert!(report.rollback_reason.unwrap().contains("operator abort"));
        assert_eq!(h.router.weights(), vec![10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_traffic_never_decreases_before_promotion() {
        let h = harness();
        let policy = CanaryPolicy::new("ServiceAlias", TrafficShiftSchedule::linear_10_percent_every_minute());

        let report = h.controller.release(request(&policy), &RunContext::new("p")).await;

        assert!(report.is_promoted());
        assert!(report.traffic_history.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(report.traffic_history.last(), Some(&100));
    }
}
