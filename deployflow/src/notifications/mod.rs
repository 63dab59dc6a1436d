//! Notification rules and their dispatcher.
//!
//! Every [`NotificationRule`] is bound to exactly one [`EventKind`], and each
//! kind has exactly one producing component. Producers call
//! [`NotificationDispatcher::on`] directly.

mod dispatcher;
mod event;
mod template;

pub use dispatcher::{NotificationDispatcher, NotificationRule, Subscriber, SubscriberProtocol};
pub use event::{EventKind, EventProducer, NotificationEvent};
pub use template::{MessageTemplate, NotificationMessage};
