//! Message templates with `{placeholder}` substitution.

use super::NotificationEvent;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{([a-z_]+)\}")
            .unwrap_or_else(|_| panic!("Static regex 'placeholder_pattern' failed to compile"))
    })
}

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    /// The subject line.
    pub subject: String,
    /// The message body.
    pub body: String,
}

/// Subject and body templates.
///
/// Known placeholders: `{pipeline}`, `{run_id}`, `{kind}`, `{stage}`,
/// `{action}`, `{reason}`, `{execution_url}`, `{alarm}`, `{traffic_percent}`.
/// Known placeholders without a value render empty; unknown ones are kept
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    /// Subject template.
    pub subject: String,
    /// Body template.
    pub body: String,
}

impl MessageTemplate {
    /// Creates a template.
    #[must_use]
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// A generic failure template.
    #[must_use]
    pub fn failure() -> Self {
        Self::new(
            "[{pipeline}] {kind} in {stage}",
            "Action {action} in stage {stage} failed: {reason}\nExecution: {execution_url}",
        )
    }

    /// A canary rollback template.
    #[must_use]
    pub fn rollback() -> Self {
        Self::new(
            "[{pipeline}] canary rolled back in {stage}",
            "{action} was rolled back at {traffic_percent}% traffic: {reason}\nExecution: {execution_url}",
        )
    }

    /// Renders the template for `event`.
    #[must_use]
    pub fn render(&self, event: &NotificationEvent) -> NotificationMessage {
        let values = event.placeholders();
        let substitute = |text: &str| {
            placeholder_pattern()
                .replace_all(text, |caps: &Captures<'_>| {
                    values
                        .get(&caps[1])
                        .cloned()
                        .unwrap_or_else(|| caps[0].to_string())
                })
                .into_owned()
        };

        NotificationMessage {
            subject: substitute(&self.subject),
            body: substitute(&self.body),
        }
    }
}
