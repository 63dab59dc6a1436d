//! Core domain model types for deployflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Action kinds and lifecycle statuses
//! - Artifact handles
//! - Run events and outcome records
//! - The per-run context

mod artifact;
mod context;
mod event;
mod outcome;
mod status;

pub use artifact::{Artifact, ArtifactLocation, ArtifactPath};
pub use context::RunContext;
pub use event::{PipelineEvent, RunEvent};
pub use outcome::{ActionOutcome, FailureReport, PipelineOutcome, StageOutcome};
pub use status::{ActionKind, ActionStatus, PipelineStatus, StageStatus};
