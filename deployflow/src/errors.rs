//! Error types for the deployflow engine.
//!
//! Configuration problems are rejected by the builder before a run starts,
//! execution problems stay local to the action that hit them, and dispatch
//! problems never leave the notification dispatcher.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for deployflow operations.
#[derive(Debug, Error)]
pub enum DeployflowError {
    /// The pipeline definition is malformed.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// An action failed while executing.
    #[error("{0}")]
    Execution(#[from] ExecutionError),

    /// An external backend call failed.
    #[error("{0}")]
    Backend(#[from] BackendError),

    /// A notification could not be delivered.
    #[error("{0}")]
    Dispatch(#[from] DispatchError),

    /// A configuration value could not be parsed.
    #[error("Invalid configuration value for {key}: '{value}'")]
    InvalidConfig {
        /// The configuration key.
        key: String,
        /// The offending raw value.
        value: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-001-DUPLICATE_STAGE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline definition fails validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Why an action ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// The backend call itself failed (network, auth, ...).
    Backend,
    /// The backend reached a terminal failed state.
    Reported,
    /// A canary release breached an alarm and was rolled back.
    RolledBack,
    /// An input artifact or binding could not be resolved.
    Binding,
    /// The action task panicked or was aborted.
    Internal,
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend => write!(f, "backend"),
            Self::Reported => write!(f, "reported"),
            Self::RolledBack => write!(f, "rolled_back"),
            Self::Binding => write!(f, "binding"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Error local to a single action execution.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Action '{action}' failed ({kind}): {message}")]
pub struct ExecutionError {
    /// The failing action.
    pub action: String,
    /// The failure category.
    pub kind: ExecutionErrorKind,
    /// Human readable reason.
    pub message: String,
}

impl ExecutionError {
    /// Creates a new execution error.
    #[must_use]
    pub fn new(action: impl Into<String>, kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            kind,
            message: message.into(),
        }
    }

    /// Wraps a backend error raised while running `action`.
    #[must_use]
    pub fn from_backend(action: impl Into<String>, err: &BackendError) -> Self {
        Self::new(action, ExecutionErrorKind::Backend, err.to_string())
    }
}

/// Errors returned by external collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend could not be reached.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Credentials were missing or rejected.
    #[error("Backend authorization failed: {0}")]
    Unauthorized(String),

    /// The backend refused the request.
    #[error("Backend rejected request: {0}")]
    Rejected(String),

    /// The requested resource does not exist.
    #[error("Backend resource not found: {0}")]
    NotFound(String),
}

/// Error raised when a notification could not reach one subscriber.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to notify '{subscriber}' for rule '{rule}': {reason}")]
pub struct DispatchError {
    /// The notification rule being fired.
    pub rule: String,
    /// The subscriber address.
    pub subscriber: String,
    /// The transport reason.
    pub reason: String,
}

impl DispatchError {
    /// Creates a new dispatch error.
    #[must_use]
    pub fn new(rule: impl Into<String>, subscriber: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            subscriber: subscriber.into(),
            reason: reason.into(),
        }
    }
}

/// Provides default suggestions for common contract error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "CONTRACT-001-EMPTY" => Some("Add at least one stage to the pipeline before building."),
            "CONTRACT-001-DUPLICATE_STAGE" => Some(
                "Stage names identify stages in outcomes and notifications. \
                 Rename one of the stages.",
            ),
            "CONTRACT-001-UNKNOWN_STAGE" => {
                Some("Add the stage to the blueprint before adding actions to it.")
            }
            "CONTRACT-002-DUPLICATE_ACTION" => {
                Some("Action names must be unique within their stage.")
            }
            "CONTRACT-002-RUN_ORDER" => Some("Run orders start at 1."),
            "CONTRACT-003-DANGLING_ARTIFACT" => Some(
                "Every input artifact must be produced by an action in an earlier stage \
                 or with a lower run order in the same stage.",
            ),
            "CONTRACT-003-DUPLICATE_ARTIFACT" => {
                Some("Each artifact is produced by exactly one action. Rename one output.")
            }
            "CONTRACT-004-EMPTY_SCHEDULE" => {
                Some("A canary policy needs at least one (percentage, hold) step.")
            }
            "CONTRACT-004-SCHEDULE_ORDER" => Some(
                "Traffic percentages must be within 1..=100 and never decrease \
                 from one step to the next.",
            ),
            "CONTRACT-005-UNKNOWN_OUTPUT" => Some(
                "Environment bindings may only read outputs of actions that complete \
                 before the consuming action starts.",
            ),
            _ => None,
        }
    }
}
