//! Stage and action definitions.

use crate::actions::DeploymentTarget;
use crate::canary::CanaryPolicy;
use crate::core::ActionKind;
use crate::ports::{SecretRef, SourceRepository};
use std::collections::BTreeMap;

/// A file inside an artifact, named before the artifact exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePath {
    /// The artifact holding the file.
    pub artifact: String,
    /// The file name within it.
    pub file: String,
}

impl TemplatePath {
    /// Creates a template path.
    #[must_use]
    pub fn new(artifact: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            artifact: artifact.into(),
            file: file.into(),
        }
    }
}

/// An environment value passed to an integration test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    /// A literal value.
    Plaintext(String),
    /// A named output of an action that completed earlier in the run.
    ActionOutput {
        /// The producing action.
        action: String,
        /// The output key.
        key: String,
    },
}

impl EnvValue {
    /// A literal value.
    #[must_use]
    pub fn plaintext(value: impl Into<String>) -> Self {
        Self::Plaintext(value.into())
    }

    /// An output of an earlier action.
    #[must_use]
    pub fn output_of(action: impl Into<String>, key: impl Into<String>) -> Self {
        Self::ActionOutput {
            action: action.into(),
            key: key.into(),
        }
    }
}

/// Kind-specific action configuration.
#[derive(Debug, Clone)]
pub enum ActionConfig {
    /// Fetch a repository branch.
    Source {
        /// Repository and branch to fetch.
        repository: SourceRepository,
        /// Token used by the provider.
        credentials: SecretRef,
    },
    /// Build the first input artifact.
    Build {
        /// Build specification file.
        build_spec: String,
    },
    /// Deploy a template, optionally through a canary release.
    Deploy {
        /// Stack and parameters to deploy.
        target: DeploymentTarget,
        /// Template file inside an input artifact.
        template: TemplatePath,
        /// Traffic-shifting policy, if any.
        canary: Option<CanaryPolicy>,
    },
    /// Run a test suite from the first input artifact.
    IntegrationTest {
        /// Test specification file.
        test_spec: String,
        /// Environment passed to the runner.
        env: BTreeMap<String, EnvValue>,
    },
    /// Send a pipeline notice.
    Notify {
        /// Notice text.
        message: String,
    },
}

/// One action of a stage.
#[derive(Debug, Clone)]
pub struct ActionSpec {
    /// Unique within the stage.
    pub name: String,
    /// Equal run orders run concurrently; higher ones wait.
    pub run_order: u32,
    /// Consumed artifact names.
    pub inputs: Vec<String>,
    /// Produced artifact name.
    pub output: Option<String>,
    /// What the action does.
    pub config: ActionConfig,
}

impl ActionSpec {
    fn new(name: impl Into<String>, config: ActionConfig) -> Self {
        Self {
            name: name.into(),
            run_order: 1,
            inputs: Vec::new(),
            output: None,
            config,
        }
    }

    /// A source fetch.
    #[must_use]
    pub fn source(name: impl Into<String>, repository: SourceRepository, credentials: SecretRef) -> Self {
        Self::new(name, ActionConfig::Source { repository, credentials })
    }

    /// A build of `input`.
    #[must_use]
    pub fn build(name: impl Into<String>, input: impl Into<String>, build_spec: impl Into<String>) -> Self {
        Self::new(
            name,
            ActionConfig::Build {
                build_spec: build_spec.into(),
            },
        )
        .with_input(input)
    }

    /// A deployment of `template` to `target`.
    ///
    /// The template artifact and the target's parameter artifact become inputs.
    #[must_use]
    pub fn deploy(name: impl Into<String>, target: DeploymentTarget, template: TemplatePath) -> Self {
        let template_artifact = template.artifact.clone();
        let parameter_artifact = target.parameter_artifact.clone();
        let mut spec = Self::new(
            name,
            ActionConfig::Deploy {
                target,
                template,
                canary: None,
            },
        )
        .with_input(template_artifact);
        if let Some(artifact) = parameter_artifact {
            spec = spec.with_input(artifact);
        }
        spec
    }

    /// A test run of the suite in `input`.
    #[must_use]
    pub fn integration_test(name: impl Into<String>, input: impl Into<String>, test_spec: impl Into<String>) -> Self {
        Self::new(
            name,
            ActionConfig::IntegrationTest {
                test_spec: test_spec.into(),
                env: BTreeMap::new(),
            },
        )
        .with_input(input)
    }

    /// A pipeline notice.
    #[must_use]
    pub fn notify(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            name,
            ActionConfig::Notify {
                message: message.into(),
            },
        )
    }

    /// Returns the action kind.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self.config {
            ActionConfig::Source { .. } => ActionKind::Source,
            ActionConfig::Build { .. } => ActionKind::Build,
            ActionConfig::Deploy { .. } => ActionKind::Deploy,
            ActionConfig::IntegrationTest { .. } => ActionKind::IntegrationTest,
            ActionConfig::Notify { .. } => ActionKind::Notify,
        }
    }

    /// Sets the run order.
    #[must_use]
    pub fn with_run_order(mut self, run_order: u32) -> Self {
        self.run_order = run_order;
        self
    }

    /// Adds an input artifact.
    #[must_use]
    pub fn with_input(mut self, artifact: impl Into<String>) -> Self {
        let artifact = artifact.into();
        if !self.inputs.contains(&artifact) {
            self.inputs.push(artifact);
        }
        self
    }

    /// Declares the produced artifact.
    #[must_use]
    pub fn with_output(mut self, artifact: impl Into<String>) -> Self {
        self.output = Some(artifact.into());
        self
    }

    /// Attaches a canary policy. Ignored for non-deploy actions.
    #[must_use]
    pub fn with_canary(mut self, policy: CanaryPolicy) -> Self {
        if let ActionConfig::Deploy { canary, .. } = &mut self.config {
            *canary = Some(policy);
        }
        self
    }

    /// Adds an environment value. Ignored for non-test actions.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: EnvValue) -> Self {
        if let ActionConfig::IntegrationTest { env, .. } = &mut self.config {
            env.insert(key.into(), value);
        }
        self
    }

    /// Returns the canary policy of a deploy action.
    #[must_use]
    pub fn canary(&self) -> Option<&CanaryPolicy> {
        match &self.config {
            ActionConfig::Deploy { canary, .. } => canary.as_ref(),
            _ => None,
        }
    }

    /// Returns the action names whose outputs this action reads.
    #[must_use]
    pub fn output_references(&self) -> Vec<&str> {
        match &self.config {
            ActionConfig::IntegrationTest { env, .. } => env
                .values()
                .filter_map(|v| match v {
                    EnvValue::ActionOutput { action, .. } => Some(action.as_str()),
                    EnvValue::Plaintext(_) => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A named set of actions.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// Unique within the pipeline.
    pub name: String,
    /// The actions, in definition order.
    pub actions: Vec<ActionSpec>,
}

impl StageSpec {
    /// Creates an empty stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    /// Adds an action.
    #[must_use]
    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    /// Adds an action in place.
    pub fn push_action(&mut self, action: ActionSpec) {
        self.actions.push(action);
    }
}
