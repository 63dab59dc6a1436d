//! Pipeline builder with validation.

use super::{Pipeline, StageSpec};
use crate::errors::{ContractErrorInfo, ContractSuggestions, PipelineValidationError};
use std::collections::{HashMap, HashSet};

/// Where an artifact or action output becomes available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position {
    stage: usize,
    run_order: u32,
}

impl Position {
    /// True if something at `self` completes before an action at `consumer` starts.
    fn precedes(self, consumer: Self) -> bool {
        self.stage < consumer.stage || (self.stage == consumer.stage && self.run_order < consumer.run_order)
    }
}

/// Builder for creating validated pipelines.
///
/// Every stage is validated as it is added, against the stages before it.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// Stages in execution order.
    stages: Vec<StageSpec>,
    /// Producer position of every declared artifact.
    artifacts: HashMap<String, Position>,
    /// Positions of every action, by name.
    actions: HashMap<String, Vec<Position>>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            artifacts: HashMap::new(),
            actions: HashMap::new(),
        }
    }

    /// Appends a stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage conflicts with earlier stages or is malformed.
    pub fn stage(mut self, spec: StageSpec) -> Result<Self, PipelineValidationError> {
        self.add_stage(spec)?;
        Ok(self)
    }

    /// Appends a stage in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage conflicts with earlier stages or is malformed.
    pub fn add_stage(&mut self, spec: StageSpec) -> Result<(), PipelineValidationError> {
        let index = self.stages.len();

        if self.stages.iter().any(|s| s.name == spec.name) {
            return Err(contract_error(
                "CONTRACT-001-DUPLICATE_STAGE",
                format!("Duplicate stage name '{}'", spec.name),
                &spec.name,
                None,
            ));
        }

        let mut names = HashSet::new();
        for action in &spec.actions {
            if !names.insert(action.name.as_str()) {
                return Err(contract_error(
                    "CONTRACT-002-DUPLICATE_ACTION",
                    format!("Duplicate action '{}' in stage '{}'", action.name, spec.name),
                    &spec.name,
                    Some(&action.name),
                ));
            }
            if action.run_order == 0 {
                return Err(contract_error(
                    "CONTRACT-002-RUN_ORDER",
                    format!("Action '{}' in stage '{}' has run order 0", action.name, spec.name),
                    &spec.name,
                    Some(&action.name),
                ));
            }
            if let Some(policy) = action.canary() {
                policy.validate().map_err(|err| err.with_stages(vec![spec.name.clone()]))?;
            }
        }

        let mut produced = HashMap::new();
        for action in &spec.actions {
            if let Some(output) = &action.output {
                if self.artifacts.contains_key(output) || produced.contains_key(output) {
                    return Err(contract_error(
                        "CONTRACT-003-DUPLICATE_ARTIFACT",
                        format!("Artifact '{output}' is produced more than once"),
                        &spec.name,
                        Some(&action.name),
                    ));
                }
                produced.insert(
                    output.clone(),
                    Position {
                        stage: index,
                        run_order: action.run_order,
                    },
                );
            }
        }

        for action in &spec.actions {
            let at = Position {
                stage: index,
                run_order: action.run_order,
            };

            for input in &action.inputs {
                let available = self
                    .artifacts
                    .get(input)
                    .or_else(|| produced.get(input))
                    .is_some_and(|producer| producer.precedes(at));
                if !available {
                    return Err(contract_error(
                        "CONTRACT-003-DANGLING_ARTIFACT",
                        format!(
                            "Action '{}' in stage '{}' consumes artifact '{input}' that is not produced before it",
                            action.name, spec.name
                        ),
                        &spec.name,
                        Some(&action.name),
                    ));
                }
            }

            for reference in action.output_references() {
                let same_stage = spec
                    .actions
                    .iter()
                    .filter(|a| a.name == reference)
                    .map(|a| Position {
                        stage: index,
                        run_order: a.run_order,
                    });
                let known = self
                    .actions
                    .get(reference)
                    .into_iter()
                    .flatten()
                    .copied()
                    .chain(same_stage)
                    .any(|producer| producer.precedes(at));
                if !known {
                    return Err(contract_error(
                        "CONTRACT-005-UNKNOWN_OUTPUT",
                        format!(
                            "Action '{}' in stage '{}' reads outputs of '{reference}', which does not run before it",
                            action.name, spec.name
                        ),
                        &spec.name,
                        Some(&action.name),
                    ));
                }
            }
        }

        self.artifacts.extend(produced);
        for action in &spec.actions {
            self.actions.entry(action.name.clone()).or_default().push(Position {
                stage: index,
                run_order: action.run_order,
            });
        }
        self.stages.push(spec);
        Ok(())
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no stages.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if self.stages.is_empty() {
            let code = "CONTRACT-001-EMPTY";
            let mut info = ContractErrorInfo::new(code, "Cannot build an empty pipeline");
            if let Some(hint) = ContractSuggestions::get(code) {
                info = info.with_fix_hint(hint);
            }
            return Err(PipelineValidationError::new("Pipeline has no stages").with_error_info(info));
        }

        Ok(Pipeline::new(self.name, self.stages))
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

pub(super) fn contract_error(code: &str, message: String, stage: &str, action: Option<&str>) -> PipelineValidationError {
    let mut info = ContractErrorInfo::new(code, message.clone()).with_context_entry("stage", stage);
    if let Some(action) = action {
        info = info.with_context_entry("action", action);
    }
    if let Some(hint) = ContractSuggestions::get(code) {
        info = info.with_fix_hint(hint);
    }
    PipelineValidationError::new(message)
        .with_stages(vec![stage.to_string()])
        .with_error_info(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::DeploymentTarget;
    use crate::canary::{CanaryPolicy, TrafficShiftSchedule};
    use crate::pipeline::{ActionSpec, EnvValue, TemplatePath};
    use crate::ports::{SecretRef, SourceRepository};

    fn source_stage() -> StageSpec {
        StageSpec::new("Source").with_action(
            ActionSpec::source(
                "ServiceSource",
                SourceRepository::new("acme", "service", "main"),
                SecretRef::new("github-token"),
            )
            .with_output("ServiceSourceOutput"),
        )
    }

    fn code(err: &PipelineValidationError) -> &str {
        err.code().unwrap_or_default()
    }

    #[test]
    fn test_builder_creation() {
        let builder = PipelineBuilder::new("test");
        assert_eq!(builder.name(), "test");
        assert_eq!(builder.stage_count(), 0);
    }

    #[test]
    fn test_builder_build_success() {
        let pipeline = PipelineBuilder::new("test")
            .stage(source_stage())
            .unwrap()
            .stage(
                StageSpec::new("Build").with_action(
                    ActionSpec::build("ServiceBuild", "ServiceSourceOutput", "buildspec.yml")
                        .with_output("ServiceBuildOutput"),
                ),
            )
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(pipeline.name(), "test");
        assert_eq!(pipeline.stage_names(), vec!["Source", "Build"]);
    }

    #[test]
    fn test_builder_empty_build() {
        let err = PipelineBuilder::new("test").build().unwrap_err();
        assert_eq!(code(&err), "CONTRACT-001-EMPTY");
    }

    #[test]
    fn test_duplicate_stage() {
        let err = PipelineBuilder::new("test")
            .stage(StageSpec::new("Build"))
            .unwrap()
            .stage(StageSpec::new("Build"))
            .unwrap_err();
        assert_eq!(code(&err), "CONTRACT-001-DUPLICATE_STAGE");
        assert_eq!(err.stages, vec!["Build".to_string()]);
    }

    #[test]
    fn test_duplicate_action() {
        let stage = StageSpec::new("Notify")
            .with_action(ActionSpec::notify("n", "a"))
            .with_action(ActionSpec::notify("n", "b"));
        let err = PipelineBuilder::new("test").stage(stage).unwrap_err();
        assert_eq!(code(&err), "CONTRACT-002-DUPLICATE_ACTION");
    }

    #[test]
    fn test_zero_run_order() {
        let stage = StageSpec::new("Notify").with_action(ActionSpec::notify("n", "a").with_run_order(0));
        let err = PipelineBuilder::new("test").stage(stage).unwrap_err();
        assert_eq!(code(&err), "CONTRACT-002-RUN_ORDER");
    }

    #[test]
    fn test_dangling_artifact() {
        let stage = StageSpec::new("Build").with_action(ActionSpec::build("b", "Nowhere", "spec"));
        let err = PipelineBuilder::new("test").stage(stage).unwrap_err();
        assert_eq!(code(&err), "CONTRACT-003-DANGLING_ARTIFACT");
        assert_eq!(err.error_info.unwrap().context["action"], "b");
    }

    #[test]
    fn test_same_run_order_cannot_consume() {
        let stage = StageSpec::new("Build")
            .with_action(ActionSpec::notify("producer", "x").with_output("A"))
            .with_action(ActionSpec::build("consumer", "A", "spec"));
        let err = PipelineBuilder::new("test").stage(stage).unwrap_err();
        assert_eq!(code(&err), "CONTRACT-003-DANGLING_ARTIFACT");

        let stage = StageSpec::new("Build")
            .with_action(ActionSpec::notify("producer", "x").with_output("A"))
            .with_action(ActionSpec::build("consumer", "A", "spec").with_run_order(2));
        assert!(PipelineBuilder::new("test").stage(stage).is_ok());
    }

    #[test]
    fn test_duplicate_artifact() {
        let stage = StageSpec::new("Build").with_action(
            ActionSpec::build("b", "ServiceSourceOutput", "spec").with_output("ServiceSourceOutput"),
        );
        let err = PipelineBuilder::new("test")
            .stage(source_stage())
            .unwrap()
            .stage(stage)
            .unwrap_err();
        assert_eq!(code(&err), "CONTRACT-003-DUPLICATE_ARTIFACT");
    }

    #[test]
    fn test_empty_canary_schedule() {
        let deploy = ActionSpec::deploy(
            "Deploy",
            DeploymentTarget::new("Prod", "Stack"),
            TemplatePath::new("ServiceSourceOutput", "t.json"),
        )
        .with_canary(CanaryPolicy::new("alias", TrafficShiftSchedule::new(Vec::new())));
        let err = PipelineBuilder::new("test")
            .stage(source_stage())
            .unwrap()
            .stage(StageSpec::new("Prod").with_action(deploy))
            .unwrap_err();
        assert_eq!(code(&err), "CONTRACT-004-EMPTY_SCHEDULE");
        assert_eq!(err.stages, vec!["Prod".to_string()]);
    }

    #[test]
    fn test_unknown_output_reference() {
        let tests = ActionSpec::integration_test("Tests", "ServiceSourceOutput", "integ.yml")
            .with_env("SERVICE_ENDPOINT", EnvValue::output_of("ServiceUpdate", "ServiceEndpoint"));
        let err = PipelineBuilder::new("test")
            .stage(source_stage())
            .unwrap()
            .stage(StageSpec::new("Test").with_action(tests))
            .unwrap_err();
        assert_eq!(code(&err), "CONTRACT-005-UNKNOWN_OUTPUT");
    }

    #[test]
    fn test_output_reference_from_lower_run_order() {
        let deploy = ActionSpec::deploy(
            "ServiceUpdate",
            DeploymentTarget::new("Test", "Stack"),
            TemplatePath::new("ServiceSourceOutput", "t.json"),
        );
        let tests = ActionSpec::integration_test("Tests", "ServiceSourceOutput", "integ.yml")
            .with_run_order(2)
            .with_env("SERVICE_ENDPOINT", EnvValue::output_of("ServiceUpdate", "ServiceEndpoint"));

        let result = PipelineBuilder::new("test")
            .stage(source_stage())
            .unwrap()
            .stage(StageSpec::new("Test").with_action(deploy).with_action(tests));
        assert!(result.is_ok());
    }

    #[test]
    fn test_empty_stage_allowed() {
        let pipeline = PipelineBuilder::new("test")
            .stage(StageSpec::new("Nothing"))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(pipeline.action_count(), 0);
    }
}
