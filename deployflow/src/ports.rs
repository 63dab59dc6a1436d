//! Ports - the external collaborators the engine drives.
//!
//! Every backend is an async trait object so the engine never depends on a
//! concrete build system, artifact store, provisioning layer or transport.
//! Implementations report terminal failures as values and reserve
//! `BackendError` for calls that could not be completed at all; the engine
//! treats both the same way.

use crate::core::{ArtifactLocation, ArtifactPath};
use crate::errors::BackendError;
use crate::notifications::{NotificationMessage, Subscriber};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A repository branch to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRepository {
    /// The repository owner.
    pub owner: String,
    /// The repository name.
    pub repo: String,
    /// The branch to track.
    pub branch: String,
}

impl SourceRepository {
    /// Creates a new repository reference.
    #[must_use]
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
        }
    }
}

/// The name of a secret holding credentials; never the secret itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretRef(pub String);

impl SecretRef {
    /// Creates a new secret reference.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

/// Fetches repository revisions into the artifact store.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Fetches the head of `repository` and returns where it was stored.
    async fn fetch(
        &self,
        repository: &SourceRepository,
        credentials: &SecretRef,
    ) -> Result<ArtifactLocation, BackendError>;
}

/// Terminal state reported by a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildResult {
    /// The build succeeded; `output` is set when the build produced an artifact.
    Succeeded {
        /// Where the build output was stored.
        output: Option<ArtifactLocation>,
    },
    /// The build ran and failed.
    Failed {
        /// Why it failed.
        reason: String,
    },
}

/// Runs builds.
#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// Builds `input` with the named build specification.
    async fn build(&self, input: &ArtifactLocation, build_spec: &str) -> Result<BuildResult, BackendError>;
}

/// Terminal state of a stack deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningStatus {
    /// The stack was created.
    Created,
    /// The stack was updated.
    Updated,
    /// The stack operation failed.
    Failed {
        /// Why it failed.
        reason: String,
    },
}

/// What the provisioning backend reports once a deployment is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReceipt {
    /// The terminal status.
    pub status: ProvisioningStatus,
    /// The deployed revision of the unit (e.g. a function version).
    pub revision: Option<String>,
    /// Stack outputs, e.g. a service endpoint.
    #[serde(default)]
    pub outputs: HashMap<String, String>,
}

impl DeploymentReceipt {
    /// Creates a receipt with the given status and no outputs.
    #[must_use]
    pub fn new(status: ProvisioningStatus) -> Self {
        Self {
            status,
            revision: None,
            outputs: HashMap::new(),
        }
    }

    /// Sets the deployed revision.
    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Adds a stack output.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }
}

/// Applies deployment templates. The only place templates are interpreted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Creates or updates `identity` from `template` with `parameters`,
    /// returning once the operation is terminal.
    async fn deploy(
        &self,
        identity: &str,
        template: &ArtifactPath,
        parameters: &HashMap<String, String>,
    ) -> Result<DeploymentReceipt, BackendError>;
}

/// Terminal state of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Every test passed.
    Passed,
    /// At least one test failed.
    Failed,
}

/// What the test runner reports once a run is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    /// The terminal status.
    pub status: TestStatus,
    /// A short summary line.
    pub summary: String,
}

/// Runs integration test suites.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Runs the suite in `input` with the given environment.
    async fn run(
        &self,
        input: &ArtifactLocation,
        test_spec: &str,
        env: &HashMap<String, String>,
    ) -> Result<TestReport, BackendError>;
}

/// An inclusive time range `[start, end]` to sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Inclusive end.
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Returns true if `at` falls inside the window.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// One metric sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// The sample value.
    pub value: f64,
}

impl Datapoint {
    /// Creates a new datapoint.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Serves metric samples to the health monitor.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Returns the samples of `metric` inside `window`.
    async fn sample(&self, metric: &str, window: &TimeWindow) -> Result<Vec<Datapoint>, BackendError>;
}

/// Delivers rendered notifications. The transport is opaque to the engine.
#[async_trait]
pub trait SubscriberChannel: Send + Sync {
    /// Sends `message` to one subscriber.
    async fn send(&self, subscriber: &Subscriber, message: &NotificationMessage) -> Result<(), BackendError>;
}

/// Splits live traffic between a baseline and a candidate revision.
#[async_trait]
pub trait TrafficRouter: Send + Sync {
    /// Returns the revision currently serving all traffic for `target`.
    async fn current_revision(&self, target: &str) -> Result<String, BackendError>;

    /// Registers `candidate` next to the baseline with 0% traffic.
    async fn register_candidate(&self, target: &str, candidate: &str) -> Result<(), BackendError>;

    /// Sends `percent` of traffic to the candidate.
    async fn set_candidate_weight(&self, target: &str, percent: u8) -> Result<(), BackendError>;

    /// Sends all traffic to `candidate` and discards the baseline.
    async fn promote(&self, target: &str, candidate: &str) -> Result<(), BackendError>;

    /// Sends all traffic back to `baseline` and drops the candidate.
    async fn reset(&self, target: &str, baseline: &str) -> Result<(), BackendError>;
}

/// The set of backends an action executor drives.
#[derive(Clone)]
pub struct Backends {
    /// Source provider.
    pub source: Arc<dyn SourceProvider>,
    /// Build backend.
    pub build: Arc<dyn BuildBackend>,
    /// Provisioning backend.
    pub provisioning: Arc<dyn ProvisioningBackend>,
    /// Test runner.
    pub tests: Arc<dyn TestRunner>,
    /// Traffic router used by canary releases.
    pub traffic: Arc<dyn TrafficRouter>,
    /// Metrics backend used by the health monitor.
    pub metrics: Arc<dyn MetricsBackend>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}
