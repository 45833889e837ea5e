pub mod email;
pub mod notification;
pub mod run_runbook;
pub mod webhook;
