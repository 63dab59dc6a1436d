//! Event sink system for observability.
//!
//! Every run reports its lifecycle through an [`EventSink`]. Sinks are owned
//! by the engine that drives the run; there is no process-wide sink.

mod sink;

pub use sink::{ChannelEventSink, CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
