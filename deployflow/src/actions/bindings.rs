//! Artifact and parameter binding.

use crate::core::{ActionOutcome, ArtifactLocation};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Resolved artifact locations and action outputs of one run.
///
/// Each action task receives its own snapshot.
#[derive(Debug, Clone, Default)]
pub struct ArtifactBindings {
    artifacts: HashMap<String, ArtifactLocation>,
    outputs: HashMap<String, HashMap<String, String>>,
}

impl ArtifactBindings {
    /// Creates empty bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds an artifact name to a location.
    pub fn bind(&mut self, artifact: impl Into<String>, location: ArtifactLocation) {
        self.artifacts.insert(artifact.into(), location);
    }

    /// Resolves an artifact name.
    #[must_use]
    pub fn resolve(&self, artifact: &str) -> Option<&ArtifactLocation> {
        self.artifacts.get(artifact)
    }

    /// Returns one named output of an earlier action.
    #[must_use]
    pub fn output(&self, action: &str, key: &str) -> Option<&str> {
        self.outputs.get(action).and_then(|o| o.get(key)).map(String::as_str)
    }

    /// Records what a succeeded action produced.
    pub fn absorb(&mut self, outcome: &ActionOutcome) {
        if let Some(artifact) = &outcome.artifact {
            self.bind(artifact.name.clone(), artifact.location.clone());
        }
        if !outcome.outputs.is_empty() {
            self.outputs.insert(outcome.action.clone(), outcome.outputs.clone());
        }
    }

    /// Number of bound artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Returns true if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

type BindingFn = dyn Fn(&ArtifactLocation) -> HashMap<String, String> + Send + Sync;

/// Maps an artifact location to deployment parameters.
#[derive(Clone)]
pub struct ParameterBinding(Arc<BindingFn>);

impl ParameterBinding {
    /// Wraps a binding function.
    pub fn new(f: impl Fn(&ArtifactLocation) -> HashMap<String, String> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Binds the code location as `{prefix}BucketName` and `{prefix}ObjectKey`.
    #[must_use]
    pub fn code_location(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::new(move |location| {
            let mut params = HashMap::new();
            params.insert(format!("{prefix}BucketName"), location.store.clone());
            params.insert(format!("{prefix}ObjectKey"), location.key.clone());
            if let Some(version) = &location.version {
                params.insert(format!("{prefix}ObjectVersion"), version.clone());
            }
            params
        })
    }

    /// Applies the binding.
    #[must_use]
    pub fn apply(&self, location: &ArtifactLocation) -> HashMap<String, String> {
        (self.0)(location)
    }
}

impl fmt::Debug for ParameterBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ParameterBinding(..)")
    }
}

/// Where a deploy action deploys to and how its parameters are derived.
#[derive(Debug, Clone)]
pub struct DeploymentTarget {
    /// Environment name, e.g. "Test" or "Prod".
    pub environment: String,
    /// The deployable unit (stack name).
    pub identity: String,
    /// Artifact whose location feeds `binding`.
    pub parameter_artifact: Option<String>,
    /// Derives parameters from `parameter_artifact`.
    pub binding: Option<ParameterBinding>,
    /// Static parameters; they win over bound ones.
    pub parameter_overrides: HashMap<String, String>,
}

impl DeploymentTarget {
    /// Creates a target without parameters.
    #[must_use]
    pub fn new(environment: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            identity: identity.into(),
            parameter_artifact: None,
            binding: None,
            parameter_overrides: HashMap::new(),
        }
    }

    /// Derives parameters from `artifact` through `binding`.
    #[must_use]
    pub fn with_parameters(mut self, artifact: impl Into<String>, binding: ParameterBinding) -> Self {
        self.parameter_artifact = Some(artifact.into());
        self.binding = Some(binding);
        self
    }

    /// Adds a static parameter.
    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameter_overrides.insert(key.into(), value.into());
        self
    }

    /// Computes the final parameter map.
    ///
    /// Returns `None` when the parameter artifact is not bound.
    #[must_use]
    pub fn parameters(&self, bindings: &ArtifactBindings) -> Option<HashMap<String, String>> {
        let mut params = match (&self.parameter_artifact, &self.binding) {
            (Some(artifact), Some(binding)) => binding.apply(bindings.resolve(artifact)?),
            _ => HashMap::new(),
        };
        params.extend(self.parameter_overrides.clone());
        Some(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ActionKind, Artifact};

    #[test]
    fn test_code_location_binding() {
        let location = ArtifactLocation::new("artifact-bucket", "build/ServiceBuild.zip").with_version("v3");
        let params = ParameterBinding::code_location("ServiceLambdaCode").apply(&location);

        assert_eq!(params["ServiceLambdaCodeBucketName"], "artifact-bucket");
        assert_eq!(params["ServiceLambdaCodeObjectKey"], "build/ServiceBuild.zip");
        assert_eq!(params["ServiceLambdaCodeObjectVersion"], "v3");
    }

    #[test]
    fn test_target_parameters_with_overrides() {
        let mut bindings = ArtifactBindings::new();
        bindings.bind("ServiceBuildOutput", ArtifactLocation::new("bucket", "key"));

        let target = DeploymentTarget::new("Prod", "ServiceStackProd")
            .with_parameters("ServiceBuildOutput", ParameterBinding::code_location("Code"))
            .with_override("CodeBucketName", "pinned-bucket")
            .with_override("Stage", "Prod");

        let params = target.parameters(&bindings).unwrap();
        assert_eq!(params["CodeBucketName"], "pinned-bucket");
        assert_eq!(params["CodeObjectKey"], "key");
        assert_eq!(params["Stage"], "Prod");
    }

    #[test]
    fn test_target_parameters_unbound_artifact() {
        let target = DeploymentTarget::new("Test", "Stack")
            .with_parameters("Missing", ParameterBinding::code_location("Code"));
        assert!(target.parameters(&ArtifactBindings::new()).is_none());
    }

    #[test]
    fn test_absorb_outcome() {
        let mut bindings = ArtifactBindings::new();
        let mut outputs = HashMap::new();
        outputs.insert("ServiceEndpoint".to_string(), "https://api/test".to_string());

        let outcome = ActionOutcome::pending("ServiceUpdate", ActionKind::Deploy, 1)
            .succeeded()
            .with_artifact(Artifact::new("Out", ArtifactLocation::new("s", "k")))
            .with_outputs(outputs);
        bindings.absorb(&outcome);

        assert_eq!(bindings.resolve("Out").unwrap().key, "k");
        assert_eq!(bindings.output("ServiceUpdate", "ServiceEndpoint"), Some("https://api/test"));
        assert_eq!(bindings.len(), 1);
    }
}
