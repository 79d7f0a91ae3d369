//! Node-type dispatch registry and the built-in handler catalog.
//!
//! Every operation a workflow can perform is a `NodeHandler` registered under
//! a string type identifier together with a UI-facing descriptor. The
//! registry is built explicitly at process start by `builtin_registry` from
//! injected resources (completion client, database pool, HTTP client) and
//! handed to the executor; nothing registers itself as an import side effect,
//! so tests can run against a partial registry.

pub mod ai;
pub mod data;
pub mod integrations;
pub mod logic;
pub mod script;
pub mod triggers;

use crate::ai::CompletionClient;
use crate::error::EngineError;
use crate::workflow::types::ExecutionContext;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

/// Reserved key in a node's input map carrying the run-variable snapshot.
pub const VARIABLES_KEY: &str = "_variables";

/// Reserved key marking a skipped-over upstream failure.
pub const ERROR_KEY: &str = "_error";

/// One typed operation. Handlers are pure async functions of
/// (config, inputs, context); mutating `ctx` variables is the only sanctioned
/// write besides the return value.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, EngineError>;
}

/// Catalog category a node type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeCategory {
    Trigger,
    Ai,
    Logic,
    Data,
    Integration,
}

/// UI-facing description of a node type: label, configurable fields, and the
/// branch handles its output can carry.
#[derive(Debug, Clone, Serialize)]
pub struct NodeDescriptor {
    #[serde(rename = "type")]
    pub node_type: String,
    pub label: String,
    pub category: NodeCategory,
    pub fields: Vec<ConfigField>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigField {
    pub name: String,
    pub required: bool,
}

impl NodeDescriptor {
    pub fn new(node_type: &str, label: &str, category: NodeCategory) -> Self {
        Self {
            node_type: node_type.to_string(),
            label: label.to_string(),
            category,
            fields: Vec::new(),
            outputs: vec!["output".to_string()],
        }
    }

    pub fn field(mut self, name: &str, required: bool) -> Self {
        self.fields.push(ConfigField {
            name: name.to_string(),
            required,
        });
        self
    }

    pub fn outputs(mut self, names: &[&str]) -> Self {
        self.outputs = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

struct RegistryEntry {
    descriptor: NodeDescriptor,
    handler: Arc<dyn NodeHandler>,
}

/// Mapping from node-type identifier to handler and descriptor.
pub struct NodeTypeRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl NodeTypeRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Add or overwrite a handler for a type identifier.
    pub fn register(&mut self, descriptor: NodeDescriptor, handler: Arc<dyn NodeHandler>) {
        tracing::debug!("registering node type: {}", descriptor.node_type);
        self.entries.insert(
            descriptor.node_type.clone(),
            RegistryEntry {
                descriptor,
                handler,
            },
        );
    }

    pub fn handler(&self, node_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.entries.get(node_type).map(|e| Arc::clone(&e.handler))
    }

    pub fn descriptor(&self, node_type: &str) -> Option<&NodeDescriptor> {
        self.entries.get(node_type).map(|e| &e.descriptor)
    }

    /// All descriptors, sorted by type identifier for a stable catalog.
    pub fn descriptors(&self) -> Vec<&NodeDescriptor> {
        let mut all: Vec<_> = self.entries.values().map(|e| &e.descriptor).collect();
        all.sort_by(|a, b| a.node_type.cmp(&b.node_type));
        all
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.entries.contains_key(node_type)
    }

    pub fn is_trigger(&self, node_type: &str) -> bool {
        self.descriptor(node_type)
            .map(|d| d.category == NodeCategory::Trigger)
            .unwrap_or(false)
    }
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// External resources the built-in handlers close over.
#[derive(Clone)]
pub struct HandlerResources {
    pub completion: Arc<dyn CompletionClient>,
    pub data_pool: SqlitePool,
    pub http: reqwest::Client,
}

/// Build the full built-in catalog against the given resources.
pub fn builtin_registry(resources: &HandlerResources) -> NodeTypeRegistry {
    let mut registry = NodeTypeRegistry::new();
    triggers::register(&mut registry);
    ai::register(&mut registry, resources);
    logic::register(&mut registry);
    data::register(&mut registry);
    integrations::register(&mut registry, resources);
    tracing::info!(
        "node-type registry ready with {} types",
        registry.entries.len()
    );
    registry
}

// ---- input helpers shared by the handlers -------------------------------

/// The node's resolved input data: non-reserved entries of the input map.
/// A single predecessor collapses to its output; several stay keyed by
/// predecessor id.
pub fn primary_input(inputs: &Value) -> Value {
    let Some(map) = inputs.as_object() else {
        return inputs.clone();
    };

    let mut upstream: Vec<(&String, &Value)> = map
        .iter()
        .filter(|(k, _)| !k.starts_with('_'))
        .collect();

    match upstream.len() {
        0 => Value::Null,
        1 => upstream.remove(0).1.clone(),
        _ => Value::Object(
            upstream
                .into_iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
    }
}

/// All non-reserved input entries, keyed by predecessor id.
pub fn upstream_inputs(inputs: &Value) -> Map<String, Value> {
    inputs
        .as_object()
        .map(|map| {
            map.iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// The run-variable snapshot the engine places under `_variables`.
pub fn input_variables(inputs: &Value) -> Value {
    inputs
        .get(VARIABLES_KEY)
        .cloned()
        .unwrap_or_else(|| json!({}))
}

pub fn require_str<'a>(config: &'a Value, key: &str) -> Result<&'a str, EngineError> {
    config
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::handler(format!("missing required config '{key}'")))
}

pub fn opt_str<'a>(config: &'a Value, key: &str) -> Option<&'a str> {
    config.get(key).and_then(|v| v.as_str())
}

pub fn opt_u64(config: &Value, key: &str) -> Option<u64> {
    config.get(key).and_then(|v| v.as_u64())
}

pub fn opt_f64(config: &Value, key: &str) -> Option<f64> {
    config.get(key).and_then(|v| v.as_f64())
}

/// Render a value as plain text: strings pass through, everything else is
/// serialized.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---- branch discriminators ----------------------------------------------

/// Wrap a branching node's output so the engine can read the taken branch.
pub fn branch_output(branch: &str, value: Value) -> Value {
    json!({ "branch": branch, "value": value })
}

/// The branch discriminator an output carries, if any.
pub fn branch_of(output: &Value) -> Option<&str> {
    output.get("branch").and_then(|b| b.as_str())
}

// ---- upstream error markers ---------------------------------------------

/// Marker the engine substitutes for a failed predecessor's output under the
/// skip policy.
pub fn error_marker(message: &str) -> Value {
    json!({ ERROR_KEY: message })
}

pub fn has_error_marker(value: &Value) -> bool {
    value.get(ERROR_KEY).is_some()
}
