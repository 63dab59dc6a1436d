//! The canonical service delivery topology.
//!
//! A blueprint always starts with three stages: `Source` fetches the
//! infrastructure and service repositories, `Build` builds both, and
//! `PipelineUpdate` redeploys the pipeline's own stack. Service stages are
//! appended per environment. Whether a stage gets a canary is decided here,
//! so the resulting [`Pipeline`] is fixed before it runs.

use super::builder::contract_error;
use super::{ActionSpec, EnvValue, Pipeline, PipelineBuilder, StageSpec, TemplatePath};
use crate::actions::{DeploymentTarget, ParameterBinding};
use crate::canary::{CanaryPolicy, TrafficShiftSchedule};
use crate::errors::PipelineValidationError;
use crate::health::AlarmRule;
use crate::ports::{SecretRef, SourceRepository};

/// Artifact holding the fetched infrastructure repository.
pub const CDK_SOURCE_OUTPUT: &str = "CdkSourceOutput";
/// Artifact holding the fetched service repository.
pub const SERVICE_SOURCE_OUTPUT: &str = "ServiceSourceOutput";
/// Artifact holding the synthesized templates.
pub const CDK_BUILD_OUTPUT: &str = "CdkBuildOutput";
/// Artifact holding the packaged service code.
pub const SERVICE_BUILD_OUTPUT: &str = "ServiceBuildOutput";

const SERVICE_UPDATE: &str = "ServiceUpdate";
const INTEGRATION_TESTS: &str = "IntegrationTests";
const PRODUCTION: &str = "Prod";

/// The repositories a blueprint fetches.
#[derive(Debug, Clone)]
pub struct BlueprintSources {
    /// Infrastructure (template) repository.
    pub cdk: SourceRepository,
    /// Service code repository.
    pub service: SourceRepository,
    /// Credentials for both.
    pub credentials: SecretRef,
}

/// A service stack deployed once per environment.
#[derive(Debug, Clone)]
pub struct ServiceStack {
    /// Stack name, also the template file stem.
    pub stack_name: String,
    /// Environment name. `"Prod"` gets a canary release.
    pub environment: String,
    /// Prefix of the code location parameters.
    pub code_parameter_prefix: String,
    /// Stack output carrying the service endpoint.
    pub endpoint_output: String,
}

impl ServiceStack {
    /// Creates a service stack with the default parameter and output names.
    #[must_use]
    pub fn new(stack_name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            environment: environment.into(),
            code_parameter_prefix: "ServiceLambdaCode".to_string(),
            endpoint_output: "ServiceEndpoint".to_string(),
        }
    }

    /// True for the production environment.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment == PRODUCTION
    }

    /// Name of the traffic alias fronting the service.
    #[must_use]
    pub fn alias(&self) -> String {
        format!("ServiceLambdaAlias{}", self.stack_name)
    }

    /// The canary policy, for production only.
    #[must_use]
    pub fn canary_policy(&self) -> Option<CanaryPolicy> {
        self.is_production().then(|| {
            CanaryPolicy::new(self.alias(), TrafficShiftSchedule::canary_10_percent_5_minutes())
                .with_alarm(AlarmRule::server_errors(&self.environment))
        })
    }

    fn template(&self) -> TemplatePath {
        TemplatePath::new(CDK_BUILD_OUTPUT, format!("{}.template.json", self.stack_name))
    }
}

/// An extra stack deployed next to a service, e.g. billing.
#[derive(Debug, Clone)]
pub struct CompanionStack {
    /// Short name; the action is `{name}Update`.
    pub name: String,
    /// Stack name, also the template file stem.
    pub stack_name: String,
}

impl CompanionStack {
    /// Creates a companion stack.
    #[must_use]
    pub fn new(name: impl Into<String>, stack_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_name: stack_name.into(),
        }
    }
}

/// Builds the service pipeline topology.
#[derive(Debug, Clone)]
pub struct ServicePipelineBlueprint {
    name: String,
    stages: Vec<StageSpec>,
}

impl ServicePipelineBlueprint {
    /// Creates the Source, Build and PipelineUpdate stages.
    ///
    /// The pipeline redeploys itself from `{pipeline_stack}.template.json`.
    #[must_use]
    pub fn new(name: impl Into<String>, pipeline_stack: impl Into<String>, sources: BlueprintSources) -> Self {
        let pipeline_stack = pipeline_stack.into();

        let source = StageSpec::new("Source")
            .with_action(
                ActionSpec::source("CdkSource", sources.cdk, sources.credentials.clone()).with_output(CDK_SOURCE_OUTPUT),
            )
            .with_action(
                ActionSpec::source("ServiceSource", sources.service, sources.credentials)
                    .with_output(SERVICE_SOURCE_OUTPUT),
            );

        let build = StageSpec::new("Build")
            .with_action(
                ActionSpec::build("CdkBuild", CDK_SOURCE_OUTPUT, "build_specs/cdk_build_specs.yml")
                    .with_output(CDK_BUILD_OUTPUT),
            )
            .with_action(
                ActionSpec::build("ServiceBuild", SERVICE_SOURCE_OUTPUT, "build_specs/service_build_specs.yml")
                    .with_output(SERVICE_BUILD_OUTPUT),
            );

        let self_update = StageSpec::new("PipelineUpdate").with_action(ActionSpec::deploy(
            "PipelineUpdate",
            DeploymentTarget::new("Pipeline", pipeline_stack.clone()),
            TemplatePath::new(CDK_BUILD_OUTPUT, format!("{pipeline_stack}.template.json")),
        ));

        Self {
            name: name.into(),
            stages: vec![source, build, self_update],
        }
    }

    /// Appends a stage deploying `service`.
    #[must_use]
    pub fn add_service_stage(mut self, service: &ServiceStack, stage_name: impl Into<String>) -> Self {
        let target = DeploymentTarget::new(&service.environment, &service.stack_name).with_parameters(
            SERVICE_BUILD_OUTPUT,
            ParameterBinding::code_location(&service.code_parameter_prefix),
        );
        let mut deploy = ActionSpec::deploy(SERVICE_UPDATE, target, service.template());
        if let Some(policy) = service.canary_policy() {
            deploy = deploy.with_canary(policy);
        }

        self.stages.push(StageSpec::new(stage_name).with_action(deploy));
        self
    }

    /// Adds a deployment of `stack` to an existing stage.
    ///
    /// # Errors
    ///
    /// Returns an error if no stage is named `stage_name`.
    pub fn add_companion_stack_to_stage(
        mut self,
        stack: &CompanionStack,
        stage_name: &str,
    ) -> Result<Self, PipelineValidationError> {
        let action = ActionSpec::deploy(
            format!("{}Update", stack.name),
            DeploymentTarget::new(stage_name, &stack.stack_name),
            TemplatePath::new(CDK_BUILD_OUTPUT, format!("{}.template.json", stack.stack_name)),
        );
        self.stage_mut(stage_name)?.push_action(action);
        Ok(self)
    }

    /// Adds integration tests at run order 2 to an existing service stage.
    ///
    /// The suite reads the service endpoint from the stage's deployment.
    ///
    /// # Errors
    ///
    /// Returns an error if no stage is named `stage_name`.
    pub fn add_integration_tests_to_stage(
        mut self,
        service: &ServiceStack,
        stage_name: &str,
    ) -> Result<Self, PipelineValidationError> {
        let action = ActionSpec::integration_test(
            INTEGRATION_TESTS,
            SERVICE_SOURCE_OUTPUT,
            "build_specs/integ_test_build_specs.yml",
        )
        .with_run_order(2)
        .with_env(
            "SERVICE_ENDPOINT",
            EnvValue::output_of(SERVICE_UPDATE, &service.endpoint_output),
        );
        self.stage_mut(stage_name)?.push_action(action);
        Ok(self)
    }

    /// Returns the stage names so far.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Validates and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        self.stages
            .into_iter()
            .try_fold(PipelineBuilder::new(self.name), PipelineBuilder::stage)?
            .build()
    }

    fn stage_mut(&mut self, stage_name: &str) -> Result<&mut StageSpec, PipelineValidationError> {
        self.stages.iter_mut().find(|s| s.name == stage_name).ok_or_else(|| {
            contract_error(
                "CONTRACT-001-UNKNOWN_STAGE",
                format!("Stage '{stage_name}' does not exist"),
                stage_name,
                None,
            )
        })
    }
}
