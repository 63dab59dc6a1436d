//! Observability utilities.

mod logging;
mod spans;

pub use logging::{init_tracing, LogFormat, LoggingConfig};
pub use spans::{action_span, run_span, stage_span, SpanTimer};
