//! Testing utilities for deployflow pipelines.
//!
//! This module provides:
//! - Scripted backends that record what the engine asked of them
//! - Pipeline fixtures and an engine harness
//! - Assertions over run outcomes

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_action_error, assert_action_status, assert_failed_at, assert_pipeline_succeeded, assert_stages_started,
};
pub use fixtures::{
    canary_pipeline, delivery_pipeline, prod_service, sample_sources, test_service, EngineHarness,
};
pub use mocks::{
    MockBackends, ProvisioningCall, RecordingChannel, RecordingTrafficRouter, ScriptedBuild, ScriptedMetrics,
    ScriptedProvisioning, ScriptedSource, ScriptedTestRunner,
};
