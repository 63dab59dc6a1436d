//! Alarm evaluation over a sliding metric window.

use super::alarm::{AlarmRule, MissingDataPolicy};
use crate::ports::{Datapoint, MetricsBackend, TimeWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of evaluating one alarm rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// The condition is not met.
    Ok,
    /// The condition is met.
    Breaching,
    /// There was nothing to evaluate.
    InsufficientData,
}

impl HealthState {
    /// Returns true for `Breaching`.
    #[must_use]
    pub fn is_breaching(self) -> bool {
        self == Self::Breaching
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Breaching => write!(f, "breaching"),
            Self::InsufficientData => write!(f, "insufficient_data"),
        }
    }
}

impl MissingDataPolicy {
    /// The state reported when no period could be evaluated.
    #[must_use]
    pub fn when_insufficient(self) -> HealthState {
        match self {
            Self::Breaching => HealthState::Breaching,
            Self::NotBreaching => HealthState::Ok,
            Self::Ignore => HealthState::InsufficientData,
        }
    }
}

/// A detailed evaluation, used for breach reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvaluation {
    /// The evaluated alarm.
    pub alarm: String,
    /// The resulting state.
    pub state: HealthState,
    /// Aggregated value of the most recent period with samples.
    pub observed: Option<f64>,
    /// Number of periods that took part in the decision.
    pub evaluated_periods: u32,
}

impl AlarmEvaluation {
    fn insufficient(rule: &AlarmRule) -> Self {
        Self {
            alarm: rule.name.clone(),
            state: rule.missing_data.when_insufficient(),
            observed: None,
            evaluated_periods: 0,
        }
    }
}

/// Evaluates alarm rules against a metrics backend.
///
/// Evaluation only reads metrics; it is safe to poll as often as needed.
#[derive(Clone)]
pub struct HealthMonitor {
    metrics: Arc<dyn MetricsBackend>,
}

impl HealthMonitor {
    /// Creates a monitor reading from `metrics`.
    #[must_use]
    pub fn new(metrics: Arc<dyn MetricsBackend>) -> Self {
        Self { metrics }
    }

    /// Evaluates `rule` over the window ending at `now`.
    pub async fn evaluate(&self, rule: &AlarmRule, now: DateTime<Utc>) -> HealthState {
        self.evaluate_detailed(rule, now).await.state
    }

    /// Evaluates `rule` and reports the observed value alongside the state.
    pub async fn evaluate_detailed(&self, rule: &AlarmRule, now: DateTime<Utc>) -> AlarmEvaluation {
        let Some(window) = window_ending_at(rule, now) else {
            warn!(alarm = %rule.name, "Alarm window out of range");
            return AlarmEvaluation::insufficient(rule);
        };

        let samples = match self.metrics.sample(&rule.metric, &window).await {
            Ok(samples) => samples,
            Err(err) => {
                warn!(alarm = %rule.name, metric = %rule.metric, error = %err, "Metric sampling failed");
                return AlarmEvaluation::insufficient(rule);
            }
        };

        let evaluation = evaluate_samples(rule, &window, &samples);
        debug!(
            alarm = %rule.name,
            state = %evaluation.state,
            observed = ?evaluation.observed,
            samples = samples.len(),
            "Alarm evaluated"
        );
        evaluation
    }
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor").finish_non_exhaustive()
    }
}

/// Returns `[now - window, now]` for the rule.
#[must_use]
pub fn window_ending_at(rule: &AlarmRule, now: DateTime<Utc>) -> Option<TimeWindow> {
    let span = chrono::Duration::from_std(rule.window()).ok()?;
    let start = now.checked_sub_signed(span)?;
    Some(TimeWindow { start, end: now })
}

/// Buckets `samples` into the rule's periods and decides the state.
#[must_use]
pub fn evaluate_samples(rule: &AlarmRule, window: &TimeWindow, samples: &[Datapoint]) -> AlarmEvaluation {
    let periods = usize::try_from(rule.evaluation_periods.max(1)).unwrap_or(1);
    let period_ms = i64::try_from(rule.period.as_millis()).unwrap_or(i64::MAX).max(1);

    let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); periods];
    for point in samples.iter().filter(|p| window.contains(p.timestamp)) {
        let offset = (point.timestamp - window.start).num_milliseconds() / period_ms;
        // A sample stamped exactly at `end` belongs to the last period.
        let index = usize::try_from(offset).unwrap_or(0).min(periods - 1);
        buckets[index].push(point.value);
    }

    let mut evaluated = 0u32;
    let mut breaching = true;
    let mut observed = None;

    for bucket in &buckets {
        let breached = match rule.statistic.aggregate(bucket) {
            Some(value) => {
                observed = Some(value);
                rule.comparison.breaches(value, rule.threshold)
            }
            None => match rule.missing_data {
                MissingDataPolicy::Breaching => true,
                MissingDataPolicy::NotBreaching => false,
                MissingDataPolicy::Ignore => continue,
            },
        };
        evaluated += 1;
        breaching &= breached;
    }

    let state = if evaluated == 0 {
        rule.missing_data.when_insufficient()
    } else if breaching {
        HealthState::Breaching
    } else {
        HealthState::Ok
    };

    AlarmEvaluation {
        alarm: rule.name.clone(),
        state,
        observed,
        evaluated_periods: evaluated,
    }
}
