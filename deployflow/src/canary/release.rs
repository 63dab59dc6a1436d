//! Canary phases and the runtime record of one release.

use super::TrafficShiftSchedule;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of a canary release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanaryPhase {
    /// Candidate registered at 0% traffic.
    Initializing,
    /// Moving traffic to the weight of step `i`.
    Shifting(usize),
    /// Holding step `i` while polling alarms.
    Baking(usize),
    /// All traffic on the candidate.
    Promoted,
    /// Moving all traffic back to the baseline.
    RollingBack,
    /// All traffic back on the baseline.
    RolledBack,
}

impl CanaryPhase {
    /// Returns true for `Promoted` and `RolledBack`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Promoted | Self::RolledBack)
    }
}

impl fmt::Display for CanaryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Shifting(i) => write!(f, "shifting({i})"),
            Self::Baking(i) => write!(f, "baking({i})"),
            Self::Promoted => write!(f, "promoted"),
            Self::RollingBack => write!(f, "rolling_back"),
            Self::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// The alarm breach that rolled a release back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmBreach {
    /// The breached alarm.
    pub alarm: String,
    /// The metric it watches.
    pub metric: String,
    /// The aggregated value of the latest period with data.
    pub observed: Option<f64>,
    /// The alarm threshold.
    pub threshold: f64,
    /// Candidate traffic weight at the breach.
    pub traffic_percent: u8,
    /// Index of the schedule step being baked.
    pub step: usize,
}

/// Runtime state of one canary release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryRelease {
    /// The traffic alias being shifted.
    pub target: String,
    /// Revision serving traffic before the release, if any.
    pub baseline_revision: Option<String>,
    /// The revision being released.
    pub candidate_revision: String,
    /// Steps to walk through.
    pub schedule: TrafficShiftSchedule,
    /// Current phase.
    pub phase: CanaryPhase,
    /// Current candidate weight.
    pub traffic_percent: u8,
    /// Every phase entered, in order.
    pub phases: Vec<CanaryPhase>,
    /// Every candidate weight applied, in order.
    pub traffic_history: Vec<u8>,
}

impl CanaryRelease {
    /// Starts a release in `Initializing` at 0%.
    #[must_use]
    pub fn new(target: impl Into<String>, candidate: impl Into<String>, schedule: TrafficShiftSchedule) -> Self {
        Self {
            target: target.into(),
            baseline_revision: None,
            candidate_revision: candidate.into(),
            schedule,
            phase: CanaryPhase::Initializing,
            traffic_percent: 0,
            phases: vec![CanaryPhase::Initializing],
            traffic_history: vec![0],
        }
    }

    /// Moves to `phase` with candidate weight `traffic_percent`.
    pub fn transition(&mut self, phase: CanaryPhase, traffic_percent: u8) {
        self.phase = phase;
        self.phases.push(phase);
        self.set_traffic(traffic_percent);
    }

    /// Records a candidate weight applied by the router.
    pub fn set_traffic(&mut self, traffic_percent: u8) {
        if traffic_percent != self.traffic_percent {
            self.traffic_history.push(traffic_percent);
        }
        self.traffic_percent = traffic_percent;
    }

    /// Summarizes the release.
    #[must_use]
    pub fn report(&self, breach: Option<AlarmBreach>, rollback_reason: Option<String>) -> CanaryReport {
        CanaryReport {
            target: self.target.clone(),
            baseline_revision: self.baseline_revision.clone(),
            candidate_revision: self.candidate_revision.clone(),
            phase: self.phase,
            traffic_percent: self.traffic_percent,
            phases: self.phases.clone(),
            traffic_history: self.traffic_history.clone(),
            breach,
            rollback_reason,
        }
    }
}

/// Final summary of a canary release, recorded on the deploy action outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryReport {
    pub target: String,
    pub baseline_revision: Option<String>,
    pub candidate_revision: String,
    /// The terminal phase.
    pub phase: CanaryPhase,
    /// Final candidate weight: 100 when promoted, 0 when rolled back.
    pub traffic_percent: u8,
    /// Every phase visited, in order.
    pub phases: Vec<CanaryPhase>,
    /// Every distinct candidate weight applied, in order.
    pub traffic_history: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breach: Option<AlarmBreach>,
    /// Why the release rolled back when no alarm breached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_reason: Option<String>,
}

impl CanaryReport {
    /// Returns true if the candidate was promoted.
    #[must_use]
    pub fn is_promoted(&self) -> bool {
        self.phase == CanaryPhase::Promoted
    }
}
