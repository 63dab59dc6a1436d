//! Alarm rules evaluated by the health monitor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How the aggregated value is compared against the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    /// `value > threshold`
    GreaterThanThreshold,
    /// `value >= threshold`
    GreaterThanOrEqualToThreshold,
    /// `value < threshold`
    LessThanThreshold,
    /// `value <= threshold`
    LessThanOrEqualToThreshold,
}

impl ComparisonOperator {
    /// Returns true if `value` breaches `threshold` under this operator.
    #[must_use]
    pub fn breaches(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThanThreshold => value > threshold,
            Self::GreaterThanOrEqualToThreshold => value >= threshold,
            Self::LessThanThreshold => value < threshold,
            Self::LessThanOrEqualToThreshold => value <= threshold,
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GreaterThanThreshold => write!(f, ">"),
            Self::GreaterThanOrEqualToThreshold => write!(f, ">="),
            Self::LessThanThreshold => write!(f, "<"),
            Self::LessThanOrEqualToThreshold => write!(f, "<="),
        }
    }
}

/// How samples inside one evaluation period are aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    /// Sum of all samples.
    #[default]
    Sum,
    /// Arithmetic mean.
    Average,
    /// Smallest sample.
    Minimum,
    /// Largest sample.
    Maximum,
    /// Number of samples.
    SampleCount,
}

impl Statistic {
    /// Aggregates `values`; `None` when there is nothing to aggregate.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn aggregate(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let value = match self {
            Self::Sum => values.iter().sum(),
            Self::Average => values.iter().sum::<f64>() / values.len() as f64,
            Self::Minimum => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Maximum => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::SampleCount => values.len() as f64,
        };
        Some(value)
    }
}

/// What an evaluation period without samples counts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingDataPolicy {
    /// Missing data counts as a breach.
    Breaching,
    /// Missing data counts as healthy.
    #[default]
    NotBreaching,
    /// Missing data is skipped; with nothing left the rule stays undecided.
    Ignore,
}

/// A threshold condition over a metric window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmRule {
    /// The alarm name reported on breach.
    pub name: String,
    /// The metric to sample.
    pub metric: String,
    /// The per-period aggregation.
    pub statistic: Statistic,
    /// The comparison against `threshold`.
    pub comparison: ComparisonOperator,
    /// The threshold value.
    pub threshold: f64,
    /// Length of one evaluation period.
    pub period: Duration,
    /// Number of consecutive periods that must all breach.
    pub evaluation_periods: u32,
    /// Treatment of periods without samples.
    pub missing_data: MissingDataPolicy,
    /// Optional human readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AlarmRule {
    /// Creates a rule alarming when the per-minute sum of `metric` exceeds zero.
    ///
    /// Adjust with the `with_*` builders.
    #[must_use]
    pub fn new(name: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            statistic: Statistic::Sum,
            comparison: ComparisonOperator::GreaterThanThreshold,
            threshold: 0.0,
            period: Duration::from_secs(60),
            evaluation_periods: 1,
            missing_data: MissingDataPolicy::NotBreaching,
            description: None,
        }
    }

    /// Alarm on server errors of a service stage: more than one error per minute.
    #[must_use]
    pub fn server_errors(stage_name: &str) -> Self {
        Self::new(format!("ServiceErrorAlarm{stage_name}"), "5XXError")
            .with_statistic(Statistic::Sum)
            .with_threshold(ComparisonOperator::GreaterThanThreshold, 1.0)
            .with_period(Duration::from_secs(60))
            .with_evaluation_periods(1)
            .with_missing_data(MissingDataPolicy::NotBreaching)
            .with_description("Service is experiencing errors.")
    }

    /// Sets the statistic.
    #[must_use]
    pub fn with_statistic(mut self, statistic: Statistic) -> Self {
        self.statistic = statistic;
        self
    }

    /// Sets the comparison and threshold.
    #[must_use]
    pub fn with_threshold(mut self, comparison: ComparisonOperator, threshold: f64) -> Self {
        self.comparison = comparison;
        self.threshold = threshold;
        self
    }

    /// Sets the evaluation period.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Sets the number of evaluation periods (at least one).
    #[must_use]
    pub fn with_evaluation_periods(mut self, periods: u32) -> Self {
        self.evaluation_periods = periods.max(1);
        self
    }

    /// Sets the missing-data policy.
    #[must_use]
    pub fn with_missing_data(mut self, policy: MissingDataPolicy) -> Self {
        self.missing_data = policy;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns the full evaluation window (`period * evaluation_periods`).
    #[must_use]
    pub fn window(&self) -> Duration {
        self.period.saturating_mul(self.evaluation_periods.max(1))
    }
}

impl fmt::Display for AlarmRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:?}({}) {} {} over {}s x {}",
            self.name,
            self.statistic,
            self.metric,
            self.comparison,
            self.threshold,
            self.period.as_secs(),
            self.evaluation_periods
        )
    }
}
