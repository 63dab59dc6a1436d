//! Cooperative cancellation for pipeline runs.
//!
//! A run observes its token at every stage boundary; an in-flight canary
//! bake observes it continuously and rolls back when it fires.

mod token;

pub use token::CancellationToken;
