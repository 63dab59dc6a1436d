//! Canary releases for production deploy actions.
//!
//! A release walks `Initializing -> Shifting(i) -> Baking(i)` over the
//! schedule and ends `Promoted`, or `RollingBack -> RolledBack` when an
//! alarm breaches, the router fails, or the run is cancelled mid-bake.

mod controller;
mod release;
mod schedule;

pub use controller::{CanaryController, CanaryRequest};
pub use release::{AlarmBreach, CanaryPhase, CanaryRelease, CanaryReport};
pub use schedule::{CanaryPolicy, TrafficShiftSchedule, TrafficStep};
