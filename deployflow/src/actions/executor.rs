//! Runs single actions against the backends.

use super::ArtifactBindings;
use crate::canary::{CanaryController, CanaryRequest};
use crate::core::{ActionOutcome, Artifact, ArtifactLocation, RunContext};
use crate::errors::{ExecutionError, ExecutionErrorKind};
use crate::notifications::{EventKind, NotificationDispatcher, NotificationEvent};
use crate::observability::SpanTimer;
use crate::pipeline::{ActionConfig, ActionSpec, EnvValue};
use crate::ports::{Backends, BuildResult, ProvisioningStatus, TestStatus};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Executes one action and reports a terminal outcome.
///
/// Backend call errors and reported failures both end in `Failed`; nothing is
/// retried here.
pub struct ActionExecutor {
    backends: Backends,
    canary: Arc<CanaryController>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl ActionExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(backends: Backends, canary: Arc<CanaryController>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            backends,
            canary,
            dispatcher,
        }
    }

    /// Runs `action` of `stage` with the given bindings.
    pub async fn execute(
        &self,
        stage: &str,
        action: &ActionSpec,
        bindings: &ArtifactBindings,
        ctx: &RunContext,
    ) -> ActionOutcome {
        let timer = SpanTimer::start(&action.name);
        let pending = ActionOutcome::pending(&action.name, action.kind(), action.run_order);

        let outcome = match self.dispatch(stage, action, bindings, ctx, pending.clone()).await {
            Ok(outcome) => outcome,
            Err(error) => pending.failed(error),
        };
        let outcome = outcome.with_duration_ms(timer.finish());

        match &outcome.error {
            None => info!(stage = %stage, action = %action.name, kind = %action.kind(), "Action succeeded"),
            Some(err) => warn!(
                stage = %stage,
                action = %action.name,
                kind = %action.kind(),
                error_kind = %err.kind,
                error = %err.message,
                "Action failed"
            ),
        }
        outcome
    }

    async fn dispatch(
        &self,
        stage: &str,
        action: &ActionSpec,
        bindings: &ArtifactBindings,
        ctx: &RunContext,
        outcome: ActionOutcome,
    ) -> Result<ActionOutcome, ExecutionError> {
        match &action.config {
            ActionConfig::Source {
                repository,
                credentials,
            } => {
                let location = self
                    .backends
                    .source
                    .fetch(repository, credentials)
                    .await
                    .map_err(|e| ExecutionError::from_backend(&action.name, &e))?;
                debug!(action = %action.name, location = %location, "Source fetched");
                Ok(with_output(outcome.succeeded(), action, Some(location)))
            }

            ActionConfig::Build { build_spec } => {
                let input = first_input(action, bindings)?;
                match self
                    .backends
                    .build
                    .build(input, build_spec)
                    .await
                    .map_err(|e| ExecutionError::from_backend(&action.name, &e))?
                {
                    BuildResult::Succeeded { output } => {
                        if action.output.is_some() && output.is_none() {
                            return Err(ExecutionError::new(
                                &action.name,
                                ExecutionErrorKind::Binding,
                                "build declared an output artifact but produced none",
                            ));
                        }
                        Ok(with_output(outcome.succeeded(), action, output))
                    }
                    BuildResult::Failed { reason } => {
                        Err(ExecutionError::new(&action.name, ExecutionErrorKind::Reported, reason))
                    }
                }
            }

            ActionConfig::Deploy {
                target,
                template,
                canary,
            } => {
                let template_path = bindings
                    .resolve(&template.artifact)
                    .ok_or_else(|| unbound(&action.name, &template.artifact))?
                    .at_path(&template.file);
                let parameters = target.parameters(bindings).ok_or_else(|| {
                    unbound(
                        &action.name,
                        target.parameter_artifact.as_deref().unwrap_or_default(),
                    )
                })?;

                let receipt = self
                    .backends
                    .provisioning
                    .deploy(&target.identity, &template_path, &parameters)
                    .await
                    .map_err(|e| ExecutionError::from_backend(&action.name, &e))?;

                match receipt.status {
                    ProvisioningStatus::Created | ProvisioningStatus::Updated => {}
                    ProvisioningStatus::Failed { reason } => {
                        return Err(ExecutionError::new(&action.name, ExecutionErrorKind::Reported, reason));
                    }
                }
                info!(
                    action = %action.name,
                    identity = %target.identity,
                    environment = %target.environment,
                    revision = ?receipt.revision,
                    "Deployment complete"
                );
                let outcome = outcome.with_outputs(receipt.outputs);

                let Some(policy) = canary else {
                    return Ok(outcome.succeeded());
                };
                let candidate = receipt.revision.ok_or_else(|| {
                    ExecutionError::new(
                        &action.name,
                        ExecutionErrorKind::Binding,
                        "deployment reported no revision to release",
                    )
                })?;

                let request = CanaryRequest {
                    stage,
                    action: &action.name,
                    candidate: &candidate,
                    policy,
                };
                let report = self.canary.release(request, ctx).await;
                if report.is_promoted() {
                    return Ok(outcome.with_canary(report).succeeded());
                }

                let message = report.breach.as_ref().map_or_else(
                    || {
                        format!(
                            "canary rolled back: {}",
                            report.rollback_reason.as_deref().unwrap_or("unknown reason")
                        )
                    },
                    |b| format!("canary rolled back: alarm {} breached at {}% traffic", b.alarm, b.traffic_percent),
                );
                Ok(outcome
                    .with_canary(report)
                    .failed(ExecutionError::new(&action.name, ExecutionErrorKind::RolledBack, message)))
            }

            ActionConfig::IntegrationTest { test_spec, env } => {
                let input = first_input(action, bindings)?;
                let env = resolve_env(&action.name, env, bindings)?;
                let report = self
                    .backends
                    .tests
                    .run(input, test_spec, &env)
                    .await
                    .map_err(|e| ExecutionError::from_backend(&action.name, &e))?;
                match report.status {
                    TestStatus::Passed => Ok(outcome.succeeded()),
                    TestStatus::Failed => Err(ExecutionError::new(
                        &action.name,
                        ExecutionErrorKind::Reported,
                        report.summary,
                    )),
                }
            }

            ActionConfig::Notify { message } => {
                let notice = NotificationEvent::new(EventKind::PipelineNotice, ctx)
                    .with_stage(stage)
                    .with_action(&action.name)
                    .with_reason(message);
                self.dispatcher.on(&notice).await;
                Ok(outcome.succeeded())
            }
        }
    }
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor").finish_non_exhaustive()
    }
}

fn unbound(action: &str, artifact: &str) -> ExecutionError {
    ExecutionError::new(
        action,
        ExecutionErrorKind::Binding,
        format!("artifact '{artifact}' is not bound"),
    )
}

fn first_input<'a>(action: &ActionSpec, bindings: &'a ArtifactBindings) -> Result<&'a ArtifactLocation, ExecutionError> {
    let name = action.inputs.first().ok_or_else(|| {
        ExecutionError::new(&action.name, ExecutionErrorKind::Binding, "action has no input artifact")
    })?;
    bindings.resolve(name).ok_or_else(|| unbound(&action.name, name))
}

fn with_output(outcome: ActionOutcome, action: &ActionSpec, location: Option<ArtifactLocation>) -> ActionOutcome {
    match (&action.output, location) {
        (Some(name), Some(location)) => outcome.with_artifact(Artifact::new(name.clone(), location)),
        _ => outcome,
    }
}

fn resolve_env(
    action: &str,
    env: &BTreeMap<String, EnvValue>,
    bindings: &ArtifactBindings,
) -> Result<HashMap<String, String>, ExecutionError> {
    env.iter()
        .map(|(key, value)| {
            let resolved = match value {
                EnvValue::Plaintext(text) => text.clone(),
                EnvValue::ActionOutput { action: source, key: output } => bindings
                    .output(source, output)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ExecutionError::new(
                            action,
                            ExecutionErrorKind::Binding,
                            format!("output '{output}' of action '{source}' is not available"),
                        )
                    })?,
            };
            Ok((key.clone(), resolved))
        })
        .collect()
}
