//! Traffic-shift schedules and canary policies.

use crate::errors::{ContractErrorInfo, ContractSuggestions, PipelineValidationError};
use crate::health::AlarmRule;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One step of a traffic shift: move `percent` of traffic, then hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStep {
    /// Candidate traffic weight, 1..=100.
    pub percent: u8,
    /// How long to bake at this weight.
    pub hold: Duration,
}

impl TrafficStep {
    /// Creates a step.
    #[must_use]
    pub const fn new(percent: u8, hold: Duration) -> Self {
        Self { percent, hold }
    }
}

/// An ordered list of traffic steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TrafficShiftSchedule {
    steps: Vec<TrafficStep>,
}

impl TrafficShiftSchedule {
    /// Creates a schedule from explicit steps. Call [`Self::validate`] before use.
    #[must_use]
    pub fn new(steps: Vec<TrafficStep>) -> Self {
        Self { steps }
    }

    /// 10% for five minutes, then everything.
    #[must_use]
    pub fn canary_10_percent_5_minutes() -> Self {
        Self::new(vec![
            TrafficStep::new(10, Duration::from_secs(5 * 60)),
            TrafficStep::new(100, Duration::ZERO),
        ])
    }

    /// 10% more traffic every minute until everything has shifted.
    #[must_use]
    pub fn linear_10_percent_every_minute() -> Self {
        let mut steps: Vec<TrafficStep> = (1..10u8)
            .map(|i| TrafficStep::new(i * 10, Duration::from_secs(60)))
            .collect();
        steps.push(TrafficStep::new(100, Duration::ZERO));
        Self::new(steps)
    }

    /// Everything at once, no bake.
    #[must_use]
    pub fn all_at_once() -> Self {
        Self::new(vec![TrafficStep::new(100, Duration::ZERO)])
    }

    /// Returns the steps in order.
    #[must_use]
    pub fn steps(&self) -> &[TrafficStep] {
        &self.steps
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if there are no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Total bake time across all steps.
    #[must_use]
    pub fn total_hold(&self) -> Duration {
        self.steps.iter().map(|s| s.hold).sum()
    }

    /// Rejects empty schedules and percentages that are out of range or decrease.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.steps.is_empty() {
            return Err(schedule_error(
                "CONTRACT-004-EMPTY_SCHEDULE",
                "Traffic-shift schedule has no steps".to_string(),
                None,
            ));
        }

        let mut previous = 0u8;
        for (index, step) in self.steps.iter().enumerate() {
            if step.percent == 0 || step.percent > 100 {
                return Err(schedule_error(
                    "CONTRACT-004-SCHEDULE_ORDER",
                    format!("Step {index} shifts {}% of traffic", step.percent),
                    Some(index),
                ));
            }
            if step.percent < previous {
                return Err(schedule_error(
                    "CONTRACT-004-SCHEDULE_ORDER",
                    format!("Step {index} lowers traffic from {previous}% to {}%", step.percent),
                    Some(index),
                ));
            }
            previous = step.percent;
        }
        Ok(())
    }
}

fn schedule_error(code: &str, message: String, step: Option<usize>) -> PipelineValidationError {
    let mut info = ContractErrorInfo::new(code, message.clone());
    if let Some(hint) = ContractSuggestions::get(code) {
        info = info.with_fix_hint(hint);
    }
    if let Some(step) = step {
        info = info.with_context_entry("step", step.to_string());
    }
    PipelineValidationError::new(message).with_error_info(info)
}

/// Definition-time canary configuration of a deploy action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryPolicy {
    /// The deployable unit whose traffic is shifted (e.g. a function alias).
    pub target: String,
    /// The traffic steps.
    pub schedule: TrafficShiftSchedule,
    /// Alarms polled while baking; any breach rolls back.
    pub alarms: Vec<AlarmRule>,
    /// Overrides the engine's poll interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<Duration>,
}

impl CanaryPolicy {
    /// Creates a policy without alarms.
    #[must_use]
    pub fn new(target: impl Into<String>, schedule: TrafficShiftSchedule) -> Self {
        Self {
            target: target.into(),
            schedule,
            alarms: Vec::new(),
            poll_interval: None,
        }
    }

    /// Binds an alarm.
    #[must_use]
    pub fn with_alarm(mut self, alarm: AlarmRule) -> Self {
        self.alarms.push(alarm);
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Validates the schedule.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        self.schedule.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for schedule in [
            TrafficShiftSchedule::canary_10_percent_5_minutes(),
            TrafficShiftSchedule::linear_10_percent_every_minute(),
            TrafficShiftSchedule::all_at_once(),
        ] {
            assert!(schedule.validate().is_ok());
            assert_eq!(schedule.steps().last().map(|s| s.percent), Some(100));
        }
    }

    #[test]
    fn test_linear_preset_shape() {
        let schedule = TrafficShiftSchedule::linear_10_percent_every_minute();
        assert_eq!(schedule.len(), 10);
        assert_eq!(schedule.steps()[0].percent, 10);
        assert_eq!(schedule.total_hold(), Duration::from_secs(9 * 60));
    }

    #[test]
    fn test_empty_schedule_rejected() {
        let err = TrafficShiftSchedule::default().validate().unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-EMPTY_SCHEDULE"));
    }

    #[test]
    fn test_decreasing_schedule_rejected() {
        let schedule = TrafficShiftSchedule::new(vec![
            TrafficStep::new(50, Duration::from_secs(60)),
            TrafficStep::new(10, Duration::from_secs(60)),
        ]);
        let err = schedule.validate().unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-SCHEDULE_ORDER"));
        assert_eq!(err.error_info.unwrap().context["step"], "1");
    }

    #[test]
    fn test_out_of_range_percent_rejected() {
        let zero = TrafficShiftSchedule::new(vec![TrafficStep::new(0, Duration::ZERO)]);
        assert!(zero.validate().is_err());

        let over = TrafficShiftSchedule::new(vec![TrafficStep::new(101, Duration::ZERO)]);
        assert!(over.validate().is_err());
    }

    #[test]
    fn test_policy_builder() {
        let policy = CanaryPolicy::new("ServiceAlias", TrafficShiftSchedule::all_at_once())
            .with_alarm(AlarmRule::server_errors("Prod"))
            .with_poll_interval(Duration::from_secs(10));
        assert_eq!(policy.alarms.len(), 1);
        assert_eq!(policy.poll_interval, Some(Duration::from_secs(10)));
        assert!(policy.validate().is_ok());
    }
}
