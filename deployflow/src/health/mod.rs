//! Health monitoring for canary releases.
//!
//! An [`AlarmRule`] names a metric, a statistic and a threshold. The
//! [`HealthMonitor`] samples the metric over the rule's window and reports
//! a [`HealthState`].

mod alarm;
mod monitor;

pub use alarm::{AlarmRule, ComparisonOperator, MissingDataPolicy, Statistic};
pub use monitor::{evaluate_samples, window_ending_at, AlarmEvaluation, HealthMonitor, HealthState};
