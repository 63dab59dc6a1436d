//! Test assertions for run outcomes.

use crate::core::{ActionStatus, PipelineOutcome, PipelineStatus};
use crate::errors::ExecutionErrorKind;

/// Asserts that the run succeeded.
pub fn assert_pipeline_succeeded(outcome: &PipelineOutcome) {
    assert_eq!(
        outcome.status,
        PipelineStatus::Succeeded,
        "Expected success, run failed with {:?}",
        outcome.failure
    );
}

/// Asserts that the run failed at `stage`/`action`.
pub fn assert_failed_at(outcome: &PipelineOutcome, stage: &str, action: &str) {
    assert_eq!(outcome.status, PipelineStatus::Failed, "Expected a failed run");
    let failure = outcome
        .failure
        .as_ref()
        .unwrap_or_else(|| panic!("Failed run has no failure report"));
    assert_eq!(
        (failure.stage.as_str(), failure.action.as_str()),
        (stage, action),
        "Run failed at an unexpected place: {}",
        failure.reason
    );
}

/// Asserts the status of one action.
pub fn assert_action_status(outcome: &PipelineOutcome, stage: &str, action: &str, expected: ActionStatus) {
    let actual = outcome
        .action(stage, action)
        .unwrap_or_else(|| panic!("No outcome for {stage}/{action}"))
        .status;
    assert_eq!(actual, expected, "Unexpected status for {stage}/{action}");
}

/// Asserts the error kind of a failed action.
pub fn assert_action_error(outcome: &PipelineOutcome, stage: &str, action: &str, expected: ExecutionErrorKind) {
    let error = outcome
        .action(stage, action)
        .and_then(|a| a.error.as_ref())
        .unwrap_or_else(|| panic!("No error recorded for {stage}/{action}"));
    assert_eq!(error.kind, expected, "Unexpected error for {stage}/{action}: {}", error.message);
}

/// Asserts exactly which stages started, in order.
pub fn assert_stages_started(outcome: &PipelineOutcome, expected: &[&str]) {
    assert_eq!(outcome.started_stages(), expected, "Unexpected stages started");
}
