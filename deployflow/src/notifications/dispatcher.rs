//! Fan-out of notification events to rule subscribers.

use super::{EventKind, MessageTemplate, NotificationEvent, NotificationMessage};
use crate::core::{PipelineEvent, RunEvent};
use crate::errors::DispatchError;
use crate::events::EventSink;
use crate::ports::SubscriberChannel;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Delivery protocol of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberProtocol {
    /// Email address.
    Email,
    /// Phone number.
    Sms,
    /// HTTP endpoint.
    Webhook,
}

/// A notification recipient.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscriber {
    /// How to reach the subscriber.
    pub protocol: SubscriberProtocol,
    /// Protocol-specific address.
    pub address: String,
}

impl Subscriber {
    /// An email subscriber.
    #[must_use]
    pub fn email(address: impl Into<String>) -> Self {
        Self {
            protocol: SubscriberProtocol::Email,
            address: address.into(),
        }
    }

    /// An SMS subscriber.
    #[must_use]
    pub fn sms(number: impl Into<String>) -> Self {
        Self {
            protocol: SubscriberProtocol::Sms,
            address: number.into(),
        }
    }

    /// A webhook subscriber.
    #[must_use]
    pub fn webhook(url: impl Into<String>) -> Self {
        Self {
            protocol: SubscriberProtocol::Webhook,
            address: url.into(),
        }
    }
}

impl fmt::Display for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.protocol, self.address)
    }
}

/// Binds one event kind to a template and a subscriber list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRule {
    /// Rule name, used in logs and dispatch errors.
    pub name: String,
    /// Event kind that fires the rule.
    pub trigger: EventKind,
    /// Message rendered for each event.
    pub template: MessageTemplate,
    /// Recipients.
    pub subscribers: Vec<Subscriber>,
}

impl NotificationRule {
    /// Creates a rule with the default template for its trigger.
    #[must_use]
    pub fn new(name: impl Into<String>, trigger: EventKind) -> Self {
        let template = if trigger == EventKind::CanaryRolledBack {
            MessageTemplate::rollback()
        } else {
            MessageTemplate::failure()
        };
        Self {
            name: name.into(),
            trigger,
            template,
            subscribers: Vec::new(),
        }
    }

    /// Replaces the template.
    #[must_use]
    pub fn with_template(mut self, template: MessageTemplate) -> Self {
        self.template = template;
        self
    }

    /// Adds a subscriber.
    #[must_use]
    pub fn with_subscriber(mut self, subscriber: Subscriber) -> Self {
        self.subscribers.push(subscriber);
        self
    }
}

/// Forwards notification events to the subscribers of matching rules.
///
/// Each event id is dispatched at most once. Ids are tracked per run until
/// [`Self::finish_run`] is called. Delivery failures are logged and dropped.
pub struct NotificationDispatcher {
    rules: Vec<NotificationRule>,
    channel: Arc<dyn SubscriberChannel>,
    sink: Arc<dyn EventSink>,
    dispatched: DashMap<Uuid, HashSet<Uuid>>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher over `rules`.
    #[must_use]
    pub fn new(
        rules: Vec<NotificationRule>,
        channel: Arc<dyn SubscriberChannel>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            rules,
            channel,
            sink,
            dispatched: DashMap::new(),
        }
    }

    /// Returns the configured rules.
    #[must_use]
    pub fn rules(&self) -> &[NotificationRule] {
        &self.rules
    }

    /// Returns true if any rule listens for `kind`.
    #[must_use]
    pub fn has_rules_for(&self, kind: EventKind) -> bool {
        self.rules.iter().any(|r| r.trigger == kind)
    }

    /// Drops the dispatch record of a finished run.
    pub fn finish_run(&self, run_id: Uuid) {
        self.dispatched.remove(&run_id);
    }

    /// Number of runs with a live dispatch record.
    #[must_use]
    pub fn tracked_runs(&self) -> usize {
        self.dispatched.len()
    }

    /// Dispatches `event` to every subscriber of every rule bound to its kind.
    ///
    /// Returns the failed deliveries; they are already logged.
    pub async fn on(&self, event: &NotificationEvent) -> Vec<DispatchError> {
        let first = self.dispatched.entry(event.run_id).or_default().insert(event.id);
        if !first {
            debug!(event_id = %event.id, kind = %event.kind, "Notification already dispatched");
            return Vec::new();
        }

        let deliveries = self
            .rules
            .iter()
            .filter(|rule| rule.trigger == event.kind)
            .flat_map(|rule| {
                let message = rule.template.render(event);
                rule.subscribers
                    .iter()
                    .map(move |subscriber| self.deliver(rule, subscriber, message.clone(), event))
            });

        let failures: Vec<DispatchError> = join_all(deliveries).await.into_iter().filter_map(Result::err).collect();

        info!(
            event_id = %event.id,
            kind = %event.kind,
            failures = failures.len(),
            "Notification dispatched"
        );
        failures
    }

    async fn deliver(
        &self,
        rule: &NotificationRule,
        subscriber: &Subscriber,
        message: NotificationMessage,
        event: &NotificationEvent,
    ) -> Result<(), DispatchError> {
        match self.channel.send(subscriber, &message).await {
            Ok(()) => {
                self.sink
                    .emit(RunEvent::new(
                        event.run_id,
                        event.pipeline.clone(),
                        PipelineEvent::NotificationSent {
                            rule: rule.name.clone(),
                            trigger: event.kind,
                            subscriber: subscriber.address.clone(),
                        },
                    ))
                    .await;
                Ok(())
            }
            Err(err) => {
                let error = DispatchError::new(&rule.name, &subscriber.address, err.to_string());
                warn!(rule = %rule.name, subscriber = %subscriber.address, error = %error, "Notification delivery failed");
                Err(error)
            }
        }
    }
}

impl fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("rules", &self.rules.len())
            .field("dispatched", &self.dispatched.len())
            .finish_non_exhaustive()
    }
}
