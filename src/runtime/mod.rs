//! Runtime layer: node execution, DAG traversal, schedules, webhooks.
//!
//! The engine drives one run at a time over a compiled definition; the
//! scheduler and webhook router are the two run initiators and both reach
//! the engine through callbacks wired up in the server layer.

pub mod engine;
pub mod executor;
pub mod scheduler;
pub mod webhook;

pub use engine::WorkflowEngine;
pub use executor::{Invocation, NodeExecutor};
pub use scheduler::{ScheduleCallback, ScheduleInfo, Scheduler};
pub use webhook::{WebhookCallback, WebhookRegistration, WebhookRequest, WebhookRouter};
