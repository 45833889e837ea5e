//! Runbook executor.
//!
//! [`RunbookExecutor`] validates a runbook's step graph, then runs steps as
//! soon as all of their dependencies are terminal, delegating the actual
//! work to a [`ThingRunner`]. Independent branches run concurrently. Each
//! step result is persisted as it lands so partial progress survives a
//! crash.

pub mod condition;
pub mod error;
pub mod executor;
pub mod graph;
pub mod retry;
pub mod runner;

#[cfg(test)]
mod tests;

pub use error::{ExecutorError, GraphError};
pub use executor::{ExecutorConfig, RunbookExecutor, StartedExecution};
pub use retry::{BackoffStrategy, ConcurrencyPolicy, RetryPolicy};
pub use runner::{ThingOutcome, ThingRunner};
