//! Engine configuration.

use crate::errors::DeployflowError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Configuration for a [`crate::pipeline::PipelineEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How often canary alarms are polled while baking.
    #[serde(default = "default_poll_interval")]
    pub canary_poll_interval: Duration,
    /// Upper bound on concurrently running actions. `None` is unbounded.
    #[serde(default)]
    pub max_parallel_actions: Option<usize>,
    /// Base URL of the execution console; run links are built from it.
    #[serde(default)]
    pub console_url: Option<String>,
    /// Level used by the logging event sink (`info` or `debug`).
    #[serde(default = "default_event_log_level")]
    pub event_log_level: String,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_event_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            canary_poll_interval: default_poll_interval(),
            max_parallel_actions: None,
            console_url: None,
            event_log_level: default_event_log_level(),
        }
    }
}

impl EngineConfig {
    /// Creates a default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the canary poll interval.
    #[must_use]
    pub fn with_canary_poll_interval(mut self, interval: Duration) -> Self {
        self.canary_poll_interval = interval;
        self
    }

    /// Caps concurrently running actions.
    #[must_use]
    pub fn with_max_parallel_actions(mut self, max: usize) -> Self {
        self.max_parallel_actions = Some(max.max(1));
        self
    }

    /// Sets the console base URL.
    #[must_use]
    pub fn with_console_url(mut self, url: impl Into<String>) -> Self {
        self.console_url = Some(url.into());
        self
    }

    /// Reads overrides from `DEPLOYFLOW_*` environment variables.
    ///
    /// - `DEPLOYFLOW_CANARY_POLL_SECS`
    /// - `DEPLOYFLOW_MAX_PARALLEL_ACTIONS`
    /// - `DEPLOYFLOW_CONSOLE_URL`
    /// - `DEPLOYFLOW_EVENT_LOG_LEVEL`
    ///
    /// # Errors
    ///
    /// Returns [`DeployflowError::InvalidConfig`] for unparsable values.
    pub fn from_env() -> Result<Self, DeployflowError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Self::from_env`] with a custom variable source.
    ///
    /// # Errors
    ///
    /// Returns [`DeployflowError::InvalidConfig`] for unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DeployflowError> {
        let mut config = Self::default();

        if let Some(raw) = lookup("DEPLOYFLOW_CANARY_POLL_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| invalid("DEPLOYFLOW_CANARY_POLL_SECS", &raw))?;
            if secs == 0 {
                return Err(invalid("DEPLOYFLOW_CANARY_POLL_SECS", &raw));
            }
            config.canary_poll_interval = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup("DEPLOYFLOW_MAX_PARALLEL_ACTIONS") {
            let max: usize = raw
                .trim()
                .parse()
                .map_err(|_| invalid("DEPLOYFLOW_MAX_PARALLEL_ACTIONS", &raw))?;
            if max == 0 {
                return Err(invalid("DEPLOYFLOW_MAX_PARALLEL_ACTIONS", &raw));
            }
            config.max_parallel_actions = Some(max);
        }

        if let Some(url) = lookup("DEPLOYFLOW_CONSOLE_URL") {
            config.console_url = Some(url);
        }

        if let Some(level) = lookup("DEPLOYFLOW_EVENT_LOG_LEVEL") {
            let level = level.to_ascii_lowercase();
            if level != "info" && level != "debug" {
                return Err(invalid("DEPLOYFLOW_EVENT_LOG_LEVEL", &level));
            }
            config.event_log_level = level;
        }

        Ok(config)
    }

    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`DeployflowError::Serialization`] for malformed JSON and
    /// [`DeployflowError::InvalidConfig`] for a zero action limit or poll interval.
    pub fn from_json(raw: &str) -> Result<Self, DeployflowError> {
        let config: Self = serde_json::from_str(raw)?;
        if config.max_parallel_actions == Some(0) {
            return Err(invalid("max_parallel_actions", "0"));
        }
        if config.canary_poll_interval.is_zero() {
            return Err(invalid("canary_poll_interval", "0"));
        }
        Ok(config)
    }

    /// Console link for one run, if a console URL is configured.
    #[must_use]
    pub fn execution_url(&self, pipeline: &str, run_id: Uuid) -> Option<String> {
        self.console_url.as_ref().map(|base| {
            format!("{}/{pipeline}/executions/{run_id}", base.trim_end_matches('/'))
        })
    }
}

fn invalid(key: &str, value: &str) -> DeployflowError {
    DeployflowError::InvalidConfig {
        key: key.to_string(),
        value: value.to_string(),
    }
}
