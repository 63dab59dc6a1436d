//! Pipeline definition and execution.
//!
//! This module provides:
//! - Stage and action definitions
//! - A validating builder producing an immutable [`Pipeline`]
//! - The service delivery blueprint
//! - The execution engine

mod blueprint;
mod builder;
mod engine;
mod graph;
mod integration_tests;
mod spec;

pub use blueprint::{
    BlueprintSources, CompanionStack, ServicePipelineBlueprint, ServiceStack, CDK_BUILD_OUTPUT, CDK_SOURCE_OUTPUT,
    SERVICE_BUILD_OUTPUT, SERVICE_SOURCE_OUTPUT,
};
pub use builder::PipelineBuilder;
pub use engine::{EngineBuilder, PipelineEngine};
pub use graph::{Pipeline, RunOrderGroup};
pub use spec::{ActionConfig, ActionSpec, EnvValue, StageSpec, TemplatePath};
