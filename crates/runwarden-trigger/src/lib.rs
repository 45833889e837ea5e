//! Trigger dispatch.
//!
//! [`TriggerService`] turns cron ticks, verified webhook calls, file-system
//! changes and manual requests into runbook firings through a
//! [`RunbookLauncher`](runwarden_common::RunbookLauncher).

pub mod error;
pub mod schedule;
pub mod service;
pub mod watch;
pub mod webhook;


pub use error::TriggerError;
pub use service::{fire_if_enabled, validate_trigger, Clock, TriggerService};
