//! # Deployflow
//!
//! A continuous-delivery pipeline engine.
//!
//! Deployflow moves a build artifact from source through build and staged
//! deployment, with support for:
//!
//! - **Stage-based execution**: stages run in order; actions inside a stage
//!   run concurrently per run-order group
//! - **Canary releases**: incremental traffic shifting with alarm-driven rollback
//! - **Health monitoring**: windowed alarm evaluation over metric samples
//! - **Notifications**: at-most-once delivery of failure and rollback notices
//! - **Event-driven observability**: a per-run event stream and tracing spans
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deployflow::prelude::*;
//!
//! let pipeline = ServicePipelineBlueprint::new("ServicePipeline", "ServicePipelineStack", sources)
//!     .add_service_stage(&ServiceStack::new("ServiceStackTest", "Test"), "Test")
//!     .add_integration_tests_to_stage(&ServiceStack::new("ServiceStackTest", "Test"), "Test")?
//!     .add_service_stage(&ServiceStack::new("ServiceStackProd", "Prod"), "Prod")
//!     .build()?;
//!
//! let engine = PipelineEngine::builder(backends, channel)
//!     .with_rule(NotificationRule::new("rollbacks", EventKind::CanaryRolledBack)
//!         .with_subscriber(Subscriber::email("ops@example.com")))
//!     .with_config(EngineConfig::from_env()?)
//!     .build();
//!
//! let outcome = engine.run(&pipeline).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod actions;
pub mod cancellation;
pub mod canary;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod health;
pub mod notifications;
pub mod observability;
pub mod pipeline;
pub mod ports;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::actions::{ArtifactBindings, DeploymentTarget, ParameterBinding};
    pub use crate::cancellation::CancellationToken;
    pub use crate::canary::{CanaryPhase, CanaryPolicy, CanaryReport, TrafficShiftSchedule, TrafficStep};
    pub use crate::config::EngineConfig;
    pub use crate::core::{
        ActionKind, ActionOutcome, ActionStatus, Artifact, ArtifactLocation, PipelineEvent, PipelineOutcome,
        PipelineStatus, RunEvent, StageOutcome, StageStatus,
    };
    pub use crate::errors::{
        BackendError, ContractErrorInfo, DeployflowError, DispatchError, ExecutionError, ExecutionErrorKind,
        PipelineValidationError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::health::{AlarmRule, ComparisonOperator, HealthMonitor, HealthState, MissingDataPolicy, Statistic};
    pub use crate::notifications::{
        EventKind, MessageTemplate, NotificationDispatcher, NotificationEvent, NotificationRule, Subscriber,
    };
    pub use crate::pipeline::{
        ActionSpec, BlueprintSources, CompanionStack, EnvValue, Pipeline, PipelineBuilder, PipelineEngine,
        ServicePipelineBlueprint, ServiceStack, StageSpec, TemplatePath,
    };
    pub use crate::ports::{
        Backends, BuildBackend, MetricsBackend, ProvisioningBackend, SourceProvider, SubscriberChannel, TestRunner,
        TrafficRouter,
    };
}
