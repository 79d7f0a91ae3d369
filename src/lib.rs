//! Pipewright: workflow automation engine.
//!
//! Workflows are directed graphs of typed nodes executed with conditional
//! branching, shared run-scoped state, per-node timeouts, recurring
//! schedules, and inbound webhooks.

// Configuration
pub mod config;

// Engine error taxonomy
pub mod error;

// AI-completion capability (external collaborator boundary)
pub mod ai;

// Node-type registry and built-in handler catalog
pub mod nodes;

// Workflow management: types, persistence, hot-reload registry
pub mod workflow;

// Runtime: executor, DAG engine, scheduler, webhook router
pub mod runtime;

// HTTP API layer
pub mod api;

// Server setup and initialization
pub mod server;

pub use error::EngineError;
pub use runtime::{NodeExecutor, Scheduler, WebhookRouter, WorkflowEngine};
pub use server::start_server;
pub use workflow::{Edge, ExecutionContext, ExecutionResult, Node, WorkflowDefinition};
