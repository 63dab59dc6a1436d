//! Test fixtures for pipeline runs.

use std::sync::Arc;

use super::{MockBackends, RecordingChannel};
use crate::actions::DeploymentTarget;
use crate::canary::CanaryPolicy;
use crate::config::EngineConfig;
use crate::core::PipelineOutcome;
use crate::events::CollectingEventSink;
use crate::notifications::NotificationRule;
use crate::pipeline::{
    ActionSpec, BlueprintSources, Pipeline, PipelineBuilder, PipelineEngine, ServicePipelineBlueprint, ServiceStack,
    StageSpec, TemplatePath,
};
use crate::ports::{SecretRef, SourceRepository};

/// An engine wired to scripted backends, a recording channel and a collecting sink.
#[derive(Debug)]
pub struct EngineHarness {
    /// The engine under test.
    pub engine: PipelineEngine,
    /// The scripted backends.
    pub mocks: MockBackends,
    /// Every delivered notification.
    pub channel: Arc<RecordingChannel>,
    /// Every run event.
    pub sink: Arc<CollectingEventSink>,
}

impl EngineHarness {
    /// Creates a harness with the default configuration.
    #[must_use]
    pub fn new(rules: Vec<NotificationRule>) -> Self {
        Self::with_config(rules, EngineConfig::default())
    }

    /// Creates a harness with `config`.
    #[must_use]
    pub fn with_config(rules: Vec<NotificationRule>, config: EngineConfig) -> Self {
        let mocks = MockBackends::new();
        let channel = Arc::new(RecordingChannel::new());
        let sink = Arc::new(CollectingEventSink::new());
        let engine = PipelineEngine::builder(mocks.backends(), channel.clone())
            .with_rules(rules)
            .with_sink(sink.clone())
            .with_config(config)
            .build();
        Self {
            engine,
            mocks,
            channel,
            sink,
        }
    }

    /// Runs `pipeline` once.
    pub async fn run(&self, pipeline: &Pipeline) -> PipelineOutcome {
        self.engine.run(pipeline).await
    }
}

/// Repositories used by the sample blueprints.
#[must_use]
pub fn sample_sources() -> BlueprintSources {
    BlueprintSources {
        cdk: SourceRepository::new("acme", "pipeline-infra", "main"),
        service: SourceRepository::new("acme", "webapp", "main"),
        credentials: SecretRef::new("github-token"),
    }
}

/// The test environment service stack.
#[must_use]
pub fn test_service() -> ServiceStack {
    ServiceStack::new("ServiceStackTest", "Test")
}

/// The production service stack.
#[must_use]
pub fn prod_service() -> ServiceStack {
    ServiceStack::new("ServiceStackProd", "Prod")
}

/// Source, Build, PipelineUpdate, Deploy-Test (with integration tests) and
/// Deploy-Prod (with a canary).
#[must_use]
pub fn delivery_pipeline() -> Pipeline {
    let result = ServicePipelineBlueprint::new("ServicePipeline", "ServicePipelineStack", sample_sources())
        .add_service_stage(&test_service(), "Deploy-Test")
        .add_integration_tests_to_stage(&test_service(), "Deploy-Test")
        .and_then(|b| b.add_service_stage(&prod_service(), "Deploy-Prod").build());
    match result {
        Ok(pipeline) => pipeline,
        Err(err) => panic!("delivery pipeline fixture is invalid: {err}"),
    }
}

/// A two-stage pipeline whose only deployment runs a canary under `policy`.
#[must_use]
pub fn canary_pipeline(policy: CanaryPolicy) -> Pipeline {
    let source = StageSpec::new("Source").with_action(
        ActionSpec::source(
            "InfraSource",
            SourceRepository::new("acme", "pipeline-infra", "main"),
            SecretRef::new("github-token"),
        )
        .with_output("Templates"),
    );
    let prod = StageSpec::new("Prod").with_action(
        ActionSpec::deploy(
            "ServiceUpdate",
            DeploymentTarget::new("Prod", "ServiceStackProd"),
            TemplatePath::new("Templates", "ServiceStackProd.template.json"),
        )
        .with_canary(policy),
    );

    let result = PipelineBuilder::new("CanaryPipeline")
        .stage(source)
        .and_then(|b| b.stage(prod))
        .and_then(PipelineBuilder::build);
    match result {
        Ok(pipeline) => pipeline,
        Err(err) => panic!("canary pipeline fixture is invalid: {err}"),
    }
}
