//! Action execution.
//!
//! An action is the unit of work inside a stage. The executor resolves its
//! input artifacts, drives the matching backend, and turns whatever happens
//! into an [`crate::core::ActionOutcome`].

mod bindings;
mod executor;

pub use bindings::{ArtifactBindings, DeploymentTarget, ParameterBinding};
pub use executor::ActionExecutor;
