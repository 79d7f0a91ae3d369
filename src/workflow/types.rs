//! Core workflow type definitions.
//!
//! Defines the structures for workflow definitions, nodes, edges, and run
//! results. These types are serialized/deserialized from JSON for persistence
//! and for the management API; field names follow the wire shape
//! (`sourceHandle`, `errorHandling`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A complete workflow definition containing nodes and their connections.
///
/// Definitions are stored as JSON in SQLite and compiled into petgraph DAGs
/// for execution. `variables` seeds the run-scoped context; `settings`
/// controls timeout and error-handling policy and is filled with defaults
/// when absent from the wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique workflow identifier (e.g., "wf-enrich-leads")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// Nodes in this workflow, keyed by unique id
    pub nodes: Vec<Node>,
    /// Directed edges connecting nodes
    pub edges: Vec<Edge>,
    /// Run-scoped variable defaults, copied into each run's context
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Execution settings, defaulted when missing
    #[serde(default)]
    pub settings: Settings,
}

impl WorkflowDefinition {
    /// Nodes of the given type, in definition order.
    pub fn nodes_of_type<'a>(&'a self, node_type: &'a str) -> impl Iterator<Item = &'a Node> {
        self.nodes.iter().filter(move |n| n.node_type == node_type)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// A single node in the workflow DAG.
///
/// Each node names a handler in the node-type registry and carries a
/// handler-specific `config` object. `label` and `position` are display
/// metadata and never influence execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow
    pub id: String,
    /// Key into the node-type registry
    #[serde(rename = "type")]
    pub node_type: String,
    /// Display label
    #[serde(default)]
    pub label: String,
    /// Handler-specific parameters
    #[serde(default = "empty_object")]
    pub config: Value,
    /// Canvas position, display only
    #[serde(default)]
    pub position: Position,
}

impl Node {
    /// Display label, falling back to the node id.
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Directed dependency between two nodes.
///
/// `source_handle` is the branch discriminator: an edge leaving a branching
/// node (condition/switch) is only traversed when the handle equals the
/// branch the source actually took. `condition` is reserved display metadata
/// and is not consulted by execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    /// Source node id
    pub source: String,
    /// Target node id
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Per-workflow execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub error_handling: ErrorHandling,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-node timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            error_handling: ErrorHandling::Stop,
            max_retries: default_max_retries(),
            timeout: default_timeout(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout() -> u64 {
    30_000
}

/// What the engine does when a node fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandling {
    /// Halt the run, mark it failed
    #[default]
    Stop,
    /// Record the error on the node and keep scheduling downstream nodes
    Skip,
    /// Re-invoke up to `max_retries` times, then fall back to stop semantics
    Retry,
}

/// Run-scoped variable store shared by every node invocation in one run.
///
/// Created once per run, cloned by reference into each handler, mutated in
/// place by variable-writing nodes, and discarded at run end. Never shared
/// across concurrent runs.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    variables: Arc<Mutex<Map<String, Value>>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context seeded from a workflow's variable defaults.
    pub fn seeded(variables: Map<String, Value>) -> Self {
        Self {
            variables: Arc::new(Mutex::new(variables)),
        }
    }

    pub async fn get(&self, name: &str) -> Option<Value> {
        self.variables.lock().await.get(name).cloned()
    }

    pub async fn set(&self, name: impl Into<String>, value: Value) {
        self.variables.lock().await.insert(name.into(), value);
    }

    /// Point-in-time copy of all variables.
    pub async fn snapshot(&self) -> Map<String, Value> {
        self.variables.lock().await.clone()
    }
}

/// Lifecycle status of one node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Success,
    Error,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Skipped)
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Result of one node visit within a run.
///
/// Created when the engine decides to visit the node and driven to exactly
/// one terminal status; never transitions afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionResult {
    pub node_id: String,
    pub node_label: String,
    pub status: NodeStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeExecutionResult {
    /// Record for a node the engine is about to invoke.
    pub fn running(node: &Node) -> Self {
        Self {
            node_id: node.id.clone(),
            node_label: node.display_label().to_string(),
            status: NodeStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
            output: None,
            error: None,
        }
    }

    /// Record for a node pruned without being invoked.
    pub fn skipped(node: &Node) -> Self {
        let now = Utc::now();
        Self {
            node_id: node.id.clone(),
            node_label: node.display_label().to_string(),
            status: NodeStatus::Skipped,
            started_at: now,
            completed_at: Some(now),
            duration_ms: 0,
            output: None,
            error: None,
        }
    }

    pub fn succeed(mut self, output: Value, duration_ms: u64) -> Self {
        self.status = NodeStatus::Success;
        self.completed_at = Some(Utc::now());
        self.duration_ms = duration_ms;
        self.output = Some(output);
        self
    }

    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = NodeStatus::Error;
        self.completed_at = Some(Utc::now());
        self.duration_ms = (Utc::now() - self.started_at).num_milliseconds().max(0) as u64;
        self.error = Some(error.into());
        self
    }
}

/// Terminal report of one workflow run.
///
/// Contains every attempted node's result in visitation order. A failed run
/// is still a complete report, never a bare error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub node_results: Vec<NodeExecutionResult>,
}

impl ExecutionResult {
    pub fn begin(workflow_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            node_results: Vec::new(),
        }
    }

    pub fn finish(mut self, status: RunStatus) -> Self {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self
    }

    /// Output of the last successful node, used as the run's overall output.
    pub fn final_output(&self) -> Option<&Value> {
        self.node_results
            .iter()
            .rev()
            .find(|r| r.status == NodeStatus::Success)
            .and_then(|r| r.output.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_defaults_filled_when_absent() {
        let raw = json!({
            "id": "wf-1",
            "name": "minimal",
            "nodes": [{"id": "n1", "type": "manual_trigger"}],
            "edges": []
        });

        let def: WorkflowDefinition = serde_json::from_value(raw).unwrap();
        assert_eq!(def.settings.error_handling, ErrorHandling::Stop);
        assert_eq!(def.settings.max_retries, 3);
        assert_eq!(def.settings.timeout, 30_000);
        assert!(def.variables.is_empty());
    }

    #[test]
    fn definition_round_trips_by_id() {
        let raw = json!({
            "id": "wf-2",
            "name": "branchy",
            "nodes": [
                {"id": "t", "type": "manual_trigger", "label": "Start", "config": {}, "position": {"x": 0.0, "y": 0.0}},
                {"id": "c", "type": "condition", "config": {"expression": "data.x > 1"}},
                {"id": "a", "type": "transform", "config": {"expression": "data"}}
            ],
            "edges": [
                {"id": "e1", "source": "t", "target": "c"},
                {"id": "e2", "source": "c", "target": "a", "sourceHandle": "true"}
            ],
            "variables": {"region": "eu"},
            "settings": {"errorHandling": "retry", "maxRetries": 1, "timeout": 500}
        });

        let def: WorkflowDefinition = serde_json::from_value(raw.clone()).unwrap();
        let round = serde_json::to_value(&def).unwrap();
        let back: WorkflowDefinition = serde_json::from_value(round).unwrap();

        let ids = |d: &WorkflowDefinition| {
            d.nodes.iter().map(|n| n.id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&def), ids(&back));
        assert_eq!(back.edges[1].source_handle.as_deref(), Some("true"));
        assert_eq!(back.settings.error_handling, ErrorHandling::Retry);
        assert_eq!(back.settings.max_retries, 1);
        assert_eq!(back.variables["region"], json!("eu"));
    }

    #[test]
    fn node_result_lifecycle() {
        let node = Node {
            id: "n1".into(),
            node_type: "transform".into(),
            label: String::new(),
            config: json!({}),
            position: Position::default(),
        };

        let started = NodeExecutionResult::running(&node);
        assert_eq!(started.status, NodeStatus::Running);
        assert!(!started.status.is_terminal());
        assert_eq!(started.node_label, "n1");

        let done = started.succeed(json!({"ok": true}), 12);
        assert_eq!(done.status, NodeStatus::Success);
        assert!(done.status.is_terminal());
        assert_eq!(done.duration_ms, 12);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn context_shared_between_clones() {
        let ctx = ExecutionContext::new();
        let other = ctx.clone();

        other.set("counter", json!(7)).await;
        assert_eq!(ctx.get("counter").await, Some(json!(7)));

        let snap = ctx.snapshot().await;
        assert_eq!(snap["counter"], json!(7));
    }
}
