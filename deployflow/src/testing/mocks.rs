//! Scripted backends for testing.
//!
//! Every backend records what it was asked to do and answers from a script
//! set up by the test. Unscripted calls succeed with plausible defaults.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{ArtifactLocation, ArtifactPath};
use crate::errors::BackendError;
use crate::notifications::{NotificationMessage, Subscriber};
use crate::ports::{
    Backends, BuildBackend, BuildResult, Datapoint, DeploymentReceipt, MetricsBackend, ProvisioningBackend,
    ProvisioningStatus, SecretRef, SourceProvider, SourceRepository, SubscriberChannel, TestReport, TestRunner,
    TestStatus, TimeWindow, TrafficRouter,
};

/// A source provider that stores every fetch under `artifacts/{repo}/{branch}`.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    failure: Mutex<Option<String>>,
    fetched: Mutex<Vec<SourceRepository>>,
}

impl ScriptedSource {
    /// Creates a provider that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every fetch fail with `reason`.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock() = Some(reason.into());
    }

    /// Returns the repositories fetched so far.
    #[must_use]
    pub fn fetched(&self) -> Vec<SourceRepository> {
        self.fetched.lock().clone()
    }
}

#[async_trait]
impl SourceProvider for ScriptedSource {
    async fn fetch(
        &self,
        repository: &SourceRepository,
        _credentials: &SecretRef,
    ) -> Result<ArtifactLocation, BackendError> {
        self.fetched.lock().push(repository.clone());
        if let Some(reason) = self.failure.lock().clone() {
            return Err(BackendError::Unauthorized(reason));
        }
        Ok(ArtifactLocation::new(
            "artifacts",
            format!("source/{}/{}.zip", repository.repo, repository.branch),
        ))
    }
}

/// A build backend keyed by build spec name.
///
/// Tracks how many builds run at once so tests can observe scheduling.
#[derive(Debug, Default)]
pub struct ScriptedBuild {
    failures: Mutex<HashMap<String, String>>,
    without_output: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    timeline: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedBuild {
    /// Creates a backend where every build succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes builds of `spec` report a failure.
    pub fn fail_spec(&self, spec: impl Into<String>, reason: impl Into<String>) {
        self.failures.lock().insert(spec.into(), reason.into());
    }

    /// Makes builds of `spec` succeed without an output location.
    pub fn omit_output(&self, spec: impl Into<String>) {
        self.without_output.lock().insert(spec.into());
    }

    /// Makes every build take `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Returns `start:{spec}` and `end:{spec}` entries in the order they happened.
    #[must_use]
    pub fn timeline(&self) -> Vec<String> {
        self.timeline.lock().clone()
    }

    /// Returns the build specs that started, in order.
    #[must_use]
    pub fn started(&self) -> Vec<String> {
        self.timeline
            .lock()
            .iter()
            .filter_map(|e| e.strip_prefix("start:").map(str::to_string))
            .collect()
    }

    /// Returns the highest number of builds that were running at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildBackend for ScriptedBuild {
    async fn build(&self, input: &ArtifactLocation, build_spec: &str) -> Result<BuildResult, BackendError> {
        self.timeline.lock().push(format!("start:{build_spec}"));
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.timeline.lock().push(format!("end:{build_spec}"));

        if let Some(reason) = self.failures.lock().get(build_spec) {
            return Ok(BuildResult::Failed { reason: reason.clone() });
        }
        let output = if self.without_output.lock().contains(build_spec) {
            None
        } else {
            Some(ArtifactLocation::new(
                "artifacts",
                format!("build/{}/{}", build_spec.trim_end_matches(".yml"), input.key),
            ))
        };
        Ok(BuildResult::Succeeded { output })
    }
}

/// One recorded provisioning call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningCall {
    /// The deployable unit.
    pub identity: String,
    /// The template applied.
    pub template: ArtifactPath,
    /// The parameters passed.
    pub parameters: HashMap<String, String>,
}

/// A provisioning backend scripted per stack identity.
#[derive(Debug, Default)]
pub struct ScriptedProvisioning {
    receipts: Mutex<HashMap<String, DeploymentReceipt>>,
    errors: Mutex<HashMap<String, BackendError>>,
    calls: Mutex<Vec<ProvisioningCall>>,
}

impl ScriptedProvisioning {
    /// Creates a backend that reports `Updated` for every stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers deployments of `identity` with `receipt`.
    pub fn respond(&self, identity: impl Into<String>, receipt: DeploymentReceipt) {
        self.receipts.lock().insert(identity.into(), receipt);
    }

    /// Makes deployments of `identity` fail at the call level.
    pub fn error_for(&self, identity: impl Into<String>, error: BackendError) {
        self.errors.lock().insert(identity.into(), error);
    }

    /// Returns every call in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProvisioningCall> {
        self.calls.lock().clone()
    }

    /// Returns the identities deployed, in order.
    #[must_use]
    pub fn deployed(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.identity.clone()).collect()
    }
}

#[async_trait]
impl ProvisioningBackend for ScriptedProvisioning {
    async fn deploy(
        &self,
        identity: &str,
        template: &ArtifactPath,
        parameters: &HashMap<String, String>,
    ) -> Result<DeploymentReceipt, BackendError> {
        self.calls.lock().push(ProvisioningCall {
            identity: identity.to_string(),
            template: template.clone(),
            parameters: parameters.clone(),
        });
        if let Some(error) = self.errors.lock().get(identity) {
            return Err(error.clone());
        }
        Ok(self
            .receipts
            .lock()
            .get(identity)
            .cloned()
            .unwrap_or_else(|| DeploymentReceipt::new(ProvisioningStatus::Updated)))
    }
}

/// A test runner returning one scripted report.
#[derive(Debug)]
pub struct ScriptedTestRunner {
    report: Mutex<TestReport>,
    calls: Mutex<Vec<HashMap<String, String>>>,
}

impl Default for ScriptedTestRunner {
    fn default() -> Self {
        Self {
            report: Mutex::new(TestReport {
                status: TestStatus::Passed,
                summary: "all tests passed".to_string(),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedTestRunner {
    /// Creates a runner where every suite passes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the report returned by every run.
    pub fn respond(&self, report: TestReport) {
        *self.report.lock() = report;
    }

    /// Returns the environment of each run.
    #[must_use]
    pub fn calls(&self) -> Vec<HashMap<String, String>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TestRunner for ScriptedTestRunner {
    async fn run(
        &self,
        _input: &ArtifactLocation,
        _test_spec: &str,
        env: &HashMap<String, String>,
    ) -> Result<TestReport, BackendError> {
        self.calls.lock().push(env.clone());
        Ok(self.report.lock().clone())
    }
}

#[derive(Debug, Default)]
struct MetricScript {
    values: Vec<Option<f64>>,
    cursor: usize,
    samples: usize,
}

/// A metrics backend that plays back one value per sample request.
///
/// Each request gets the next scripted value as a single datapoint stamped
/// at the end of the requested window; `None` yields no datapoint. The last
/// value repeats forever. Unscripted metrics have no data.
#[derive(Debug, Default)]
pub struct ScriptedMetrics {
    scripts: Mutex<HashMap<String, MetricScript>>,
}

impl ScriptedMetrics {
    /// Creates a backend with no data.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plays back `values` for `metric`.
    pub fn script(&self, metric: impl Into<String>, values: Vec<Option<f64>>) {
        let mut scripts = self.scripts.lock();
        let entry = scripts.entry(metric.into()).or_default();
        entry.values = values;
        entry.cursor = 0;
    }

    /// Always reports `value` for `metric`.
    pub fn set_constant(&self, metric: impl Into<String>, value: f64) {
        self.script(metric, vec![Some(value)]);
    }

    /// Returns how many times `metric` was sampled.
    #[must_use]
    pub fn sample_count(&self, metric: &str) -> usize {
        self.scripts.lock().get(metric).map_or(0, |s| s.samples)
    }
}

#[async_trait]
impl MetricsBackend for ScriptedMetrics {
    async fn sample(&self, metric: &str, window: &TimeWindow) -> Result<Vec<Datapoint>, BackendError> {
        let mut scripts = self.scripts.lock();
        let script = scripts.entry(metric.to_string()).or_default();
        script.samples += 1;

        let Some(last) = script.values.len().checked_sub(1) else {
            return Ok(Vec::new());
        };
        let value = script.values[script.cursor.min(last)];
        script.cursor += 1;

        Ok(value.map(|v| Datapoint::new(window.end, v)).into_iter().collect())
    }
}

/// A subscriber channel that records deliveries.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(Subscriber, NotificationMessage)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingChannel {
    /// Creates a channel that delivers everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes deliveries to `address` fail.
    pub fn fail_for(&self, address: impl Into<String>) {
        self.failing.lock().insert(address.into());
    }

    /// Returns every successful delivery in order.
    #[must_use]
    pub fn sent(&self) -> Vec<(Subscriber, NotificationMessage)> {
        self.sent.lock().clone()
    }

    /// Returns the messages delivered to `address`.
    #[must_use]
    pub fn sent_to(&self, address: &str) -> Vec<NotificationMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|(s, _)| s.address == address)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl SubscriberChannel for RecordingChannel {
    async fn send(&self, subscriber: &Subscriber, message: &NotificationMessage) -> Result<(), BackendError> {
        if self.failing.lock().contains(&subscriber.address) {
            return Err(BackendError::Unavailable(format!("{} unreachable", subscriber.address)));
        }
        self.sent.lock().push((subscriber.clone(), message.clone()));
        Ok(())
    }
}

#[derive(Debug)]
struct RouterState {
    serving: String,
    candidate: Option<String>,
    weights: Vec<u8>,
    promoted: Vec<String>,
    resets: Vec<String>,
    fail_weight_at: Option<u8>,
}

/// A traffic router that records every weight change.
#[derive(Debug)]
pub struct RecordingTrafficRouter {
    state: Mutex<RouterState>,
}

impl RecordingTrafficRouter {
    /// Creates a router where `baseline` serves all traffic.
    #[must_use]
    pub fn new(baseline: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(RouterState {
                serving: baseline.into(),
                candidate: None,
                weights: Vec::new(),
                promoted: Vec::new(),
                resets: Vec::new(),
                fail_weight_at: None,
            }),
        }
    }

    /// Makes the shift to `percent` fail.
    pub fn fail_weight_at(&self, percent: u8) {
        self.state.lock().fail_weight_at = Some(percent);
    }

    /// Returns every candidate weight applied, in order.
    #[must_use]
    pub fn weights(&self) -> Vec<u8> {
        self.state.lock().weights.clone()
    }

    /// Returns the promoted revisions.
    #[must_use]
    pub fn promoted(&self) -> Vec<String> {
        self.state.lock().promoted.clone()
    }

    /// Returns the baselines traffic was reset to.
    #[must_use]
    pub fn resets(&self) -> Vec<String> {
        self.state.lock().resets.clone()
    }

    /// Returns the revision serving all traffic.
    #[must_use]
    pub fn serving(&self) -> String {
        self.state.lock().serving.clone()
    }
}

#[async_trait]
impl TrafficRouter for RecordingTrafficRouter {
    async fn current_revision(&self, _target: &str) -> Result<String, BackendError> {
        Ok(self.state.lock().serving.clone())
    }

    async fn register_candidate(&self, _target: &str, candidate: &str) -> Result<(), BackendError> {
        self.state.lock().candidate = Some(candidate.to_string());
        Ok(())
    }

    async fn set_candidate_weight(&self, target: &str, percent: u8) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.fail_weight_at == Some(percent) {
            return Err(BackendError::Rejected(format!("cannot route {percent}% of {target}")));
        }
        state.weights.push(percent);
        Ok(())
    }

    async fn promote(&self, _target: &str, candidate: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.serving = candidate.to_string();
        state.candidate = None;
        state.promoted.push(candidate.to_string());
        Ok(())
    }

    async fn reset(&self, _target: &str, baseline: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.serving = baseline.to_string();
        state.candidate = None;
        state.resets.push(baseline.to_string());
        Ok(())
    }
}

/// One scripted instance of every backend.
#[derive(Debug, Clone)]
pub struct MockBackends {
    /// Source provider.
    pub source: Arc<ScriptedSource>,
    /// Build backend.
    pub build: Arc<ScriptedBuild>,
    /// Provisioning backend.
    pub provisioning: Arc<ScriptedProvisioning>,
    /// Test runner.
    pub tests: Arc<ScriptedTestRunner>,
    /// Traffic router; revision "1" serves initially.
    pub traffic: Arc<RecordingTrafficRouter>,
    /// Metrics backend.
    pub metrics: Arc<ScriptedMetrics>,
}

impl Default for MockBackends {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackends {
    /// Creates fresh backends.
    #[must_use]
    pub fn new() -> Self {
        Self {
            source: Arc::new(ScriptedSource::new()),
            build: Arc::new(ScriptedBuild::new()),
            provisioning: Arc::new(ScriptedProvisioning::new()),
            tests: Arc::new(ScriptedTestRunner::new()),
            traffic: Arc::new(RecordingTrafficRouter::new("1")),
            metrics: Arc::new(ScriptedMetrics::new()),
        }
    }

    /// Returns the backends as trait objects.
    #[must_use]
    pub fn backends(&self) -> Backends {
        Backends {
            source: self.source.clone(),
            build: self.build.clone(),
            provisioning: self.provisioning.clone(),
            tests: self.tests.clone(),
            traffic: self.traffic.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn window() -> TimeWindow {
        let end = Utc::now();
        TimeWindow {
            start: end - chrono::Duration::minutes(1),
            end,
        }
    }

    #[tokio::test]
    async fn test_scripted_metrics_repeats_last_value() {
        let metrics = ScriptedMetrics::new();
        metrics.script("5XXError", vec![None, Some(2.0)]);

        assert!(metrics.sample("5XXError", &window()).await.unwrap().is_empty());
        for _ in 0..3 {
            let samples = metrics.sample("5XXError", &window()).await.unwrap();
            assert_eq!(samples.len(), 1);
            assert_eq!(samples[0].value, 2.0);
        }
        assert_eq!(metrics.sample_count("5XXError"), 4);
        assert_eq!(metrics.sample_count("Latency"), 0);
    }

    #[tokio::test]
    async fn test_recording_router() {
        let router = RecordingTrafficRouter::new("1");
        router.fail_weight_at(50);

        router.register_candidate("alias", "2").await.unwrap();
        router.set_candidate_weight("alias", 10).await.unwrap();
        assert!(router.set_candidate_weight("alias", 50).await.is_err());
        router.reset("alias", "1").await.unwrap();

        assert_eq!(router.weights(), vec![10]);
        assert_eq!(router.resets(), vec!["1".to_string()]);
        assert_eq!(router.serving(), "1");
    }

    #[tokio::test]
    async fn test_recording_channel_failures_not_recorded() {
        let channel = RecordingChannel::new();
        channel.fail_for("ops@example.com");
        let message = NotificationMessage {
            subject: "s".to_string(),
            body: "b".to_string(),
        };

        assert!(channel.send(&Subscriber::email("ops@example.com"), &message).await.is_err());
        assert!(channel.send(&Subscriber::email("dev@example.com"), &message).await.is_ok());
        assert_eq!(channel.sent().len(), 1);
        assert_eq!(channel.sent_to("dev@example.com").len(), 1);
    }

    #[tokio::test]
    async fn test_build_tracks_concurrency() {
        let build = Arc::new(ScriptedBuild::new());
        let input = ArtifactLocation::new("s", "k");
        build.fail_spec("broken.yml", "boom");

        let (a, b) = tokio::join!(build.build(&input, "a.yml"), build.build(&input, "broken.yml"));
        assert!(matches!(a.unwrap(), BuildResult::Succeeded { output: Some(_) }));
        assert!(matches!(b.unwrap(), BuildResult::Failed { .. }));
        assert_eq!(build.started().len(), 2);
    }
}
