//! Petgraph-based DAG execution engine.
//!
//! Compiles a workflow definition into a directed graph, validates it, and
//! drives one run: topological visitation from the trigger, branch pruning on
//! `sourceHandle` discriminators, input fan-in from upstream outputs, and the
//! per-workflow error-handling policy.

use crate::error::EngineError;
use crate::nodes::{branch_of, error_marker, VARIABLES_KEY};
use crate::runtime::executor::NodeExecutor;
use crate::workflow::types::{
    Edge, ErrorHandling, ExecutionContext, ExecutionResult, Node, NodeExecutionResult, RunStatus,
    WorkflowDefinition,
};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// DAG execution engine. One instance serves every run; all run state lives
/// on the stack of `run`.
pub struct WorkflowEngine {
    executor: Arc<NodeExecutor>,
}

/// Completion state of a node within one run.
enum NodeState {
    Succeeded(Value),
    Failed(String),
    Skipped,
}

impl WorkflowEngine {
    pub fn new(executor: Arc<NodeExecutor>) -> Self {
        Self { executor }
    }

    /// Check a definition is runnable. Raised before any run state exists;
    /// a failure here never produces a partial ExecutionResult.
    pub fn validate(&self, def: &WorkflowDefinition) -> Result<(), EngineError> {
        if def.id.is_empty() {
            return Err(EngineError::validation("workflow id is required"));
        }
        if def.name.is_empty() {
            return Err(EngineError::validation("workflow name is required"));
        }
        if def.nodes.is_empty() {
            return Err(EngineError::validation("workflow has no nodes"));
        }

        let mut seen = HashSet::new();
        for node in &def.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(EngineError::validation(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
            if !node.config.is_object() {
                return Err(EngineError::validation(format!(
                    "node '{}' config must be an object",
                    node.id
                )));
            }
        }

        for edge in &def.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !seen.contains(endpoint.as_str()) {
                    return Err(EngineError::validation(format!(
                        "edge '{}' references unknown node '{}'",
                        edge.id, endpoint
                    )));
                }
            }
        }

        if self.find_trigger(def).is_none() {
            return Err(EngineError::validation("workflow has no trigger node"));
        }

        Ok(())
    }

    /// First trigger-category node in definition order.
    fn find_trigger<'a>(&self, def: &'a WorkflowDefinition) -> Option<&'a Node> {
        def.nodes
            .iter()
            .find(|n| self.executor.registry().is_trigger(&n.node_type))
    }

    /// Execute one run of the workflow with the given trigger payload.
    pub async fn run(
        &self,
        def: &WorkflowDefinition,
        trigger_input: Value,
    ) -> Result<ExecutionResult, EngineError> {
        self.validate(def)?;

        let (graph, index_of) = build_graph(def);
        let topo = toposort(&graph, None)
            .map_err(|_| EngineError::validation("workflow contains a cycle"))?;

        let trigger = self
            .find_trigger(def)
            .ok_or_else(|| EngineError::validation("workflow has no trigger node"))?;
        let trigger_index = index_of[trigger.id.as_str()];
        let reachable = reachable_from(&graph, trigger_index);

        tracing::info!(
            "🚀 run of workflow '{}': {} of {} nodes reachable from trigger '{}'",
            def.id,
            reachable.len(),
            def.nodes.len(),
            trigger.id
        );

        let ctx = ExecutionContext::seeded(def.variables.clone());
        let mut result = ExecutionResult::begin(&def.id);
        let mut states: HashMap<NodeIndex, NodeState> = HashMap::new();
        let mut halted = false;

        for &ix in &topo {
            if !reachable.contains(&ix) {
                continue;
            }
            let node = &graph[ix];

            if halted {
                result.node_results.push(NodeExecutionResult::skipped(node));
                states.insert(ix, NodeState::Skipped);
                continue;
            }

            let inputs = if ix == trigger_index {
                let mut map = Map::new();
                map.insert("data".to_string(), trigger_input.clone());
                map.insert(
                    VARIABLES_KEY.to_string(),
                    Value::Object(ctx.snapshot().await),
                );
                Some(Value::Object(map))
            } else {
                self.gather_inputs(&graph, ix, &states, &ctx).await
            };

            let Some(inputs) = inputs else {
                // No satisfied incoming edge: pruned by branching.
                result.node_results.push(NodeExecutionResult::skipped(node));
                states.insert(ix, NodeState::Skipped);
                continue;
            };

            let record = NodeExecutionResult::running(node);
            match self.invoke_with_policy(def, node, inputs, &ctx).await {
                Ok((output, duration_ms)) => {
                    states.insert(ix, NodeState::Succeeded(output.clone()));
                    result.node_results.push(record.succeed(output, duration_ms));
                }
                Err(e) => {
                    let message = e.to_string();
                    tracing::warn!("❌ node '{}' failed: {}", node.id, message);
                    result.node_results.push(record.fail(message.clone()));

                    let continue_past = def.settings.error_handling == ErrorHandling::Skip
                        && ix != trigger_index;
                    states.insert(ix, NodeState::Failed(message));
                    if !continue_past {
                        halted = true;
                    }
                }
            }
        }

        let status = if halted {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        let result = result.finish(status);

        tracing::info!(
            "🏁 run {} of workflow '{}' finished: {:?} ({} node results)",
            result.id,
            def.id,
            result.status,
            result.node_results.len()
        );
        Ok(result)
    }

    /// Collect the input map for a non-trigger node: one entry per satisfied
    /// incoming edge, keyed by predecessor id, plus the variable snapshot.
    /// Returns None when no incoming edge is satisfied.
    async fn gather_inputs(
        &self,
        graph: &DiGraph<Node, Edge>,
        ix: NodeIndex,
        states: &HashMap<NodeIndex, NodeState>,
        ctx: &ExecutionContext,
    ) -> Option<Value> {
        let mut map = Map::new();

        for edge_ref in graph.edges_directed(ix, Direction::Incoming) {
            let source = edge_ref.source();
            let edge = edge_ref.weight();
            match states.get(&source) {
                Some(NodeState::Succeeded(output)) => {
                    if edge_satisfied(edge, output) {
                        map.insert(graph[source].id.clone(), output.clone());
                    }
                }
                // Skip policy: a failed predecessor still schedules its
                // downstream nodes, with an error marker in place of output.
                Some(NodeState::Failed(message)) => {
                    map.insert(graph[source].id.clone(), error_marker(message));
                }
                Some(NodeState::Skipped) | None => {}
            }
        }

        if map.is_empty() {
            return None;
        }

        map.insert(
            VARIABLES_KEY.to_string(),
            Value::Object(ctx.snapshot().await),
        );
        Some(Value::Object(map))
    }

    /// Invoke one node, applying the retry policy. Returns the output and
    /// duration of the successful attempt.
    async fn invoke_with_policy(
        &self,
        def: &WorkflowDefinition,
        node: &Node,
        inputs: Value,
        ctx: &ExecutionContext,
    ) -> Result<(Value, u64), EngineError> {
        let attempts = match def.settings.error_handling {
            ErrorHandling::Retry => 1 + def.settings.max_retries,
            _ => 1,
        };

        let mut last_error = EngineError::handler("node was never attempted");
        for attempt in 1..=attempts {
            match self
                .executor
                .invoke(
                    &node.node_type,
                    node.config.clone(),
                    inputs.clone(),
                    ctx.clone(),
                    def.settings.timeout,
                )
                .await
            {
                Ok(invocation) => return Ok((invocation.output, invocation.duration_ms)),
                Err(e) => {
                    if attempt < attempts {
                        tracing::warn!(
                            "🔁 node '{}' attempt {}/{} failed: {}",
                            node.id,
                            attempt,
                            attempts,
                            e
                        );
                    }
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

/// An edge is satisfied once its source completes, unless the source output
/// carries a branch discriminator and the edge names a different handle.
fn edge_satisfied(edge: &Edge, source_output: &Value) -> bool {
    match (&edge.source_handle, branch_of(source_output)) {
        (Some(handle), Some(branch)) => handle == branch,
        _ => true,
    }
}

/// Build the petgraph DAG, keeping id → index lookups for traversal.
fn build_graph<'a>(
    def: &'a WorkflowDefinition,
) -> (DiGraph<Node, Edge>, HashMap<&'a str, NodeIndex>) {
    let mut graph = DiGraph::new();
    let mut index_of = HashMap::new();

    for node in &def.nodes {
        let ix = graph.add_node(node.clone());
        index_of.insert(node.id.as_str(), ix);
    }
    for edge in &def.edges {
        // endpoints were validated against the node set
        let from = index_of[edge.source.as_str()];
        let to = index_of[edge.target.as_str()];
        graph.add_edge(from, to, edge.clone());
    }

    (graph, index_of)
}

/// BFS over outgoing edges from the trigger.
fn reachable_from(graph: &DiGraph<Node, Edge>, start: NodeIndex) -> HashSet<NodeIndex> {
    let mut reachable = HashSet::new();
    let mut queue = VecDeque::new();
    reachable.insert(start);
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        for next in graph.neighbors(current) {
            if reachable.insert(next) {
                queue.push_back(next);
            }
        }
    }

    reachable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{
        triggers, NodeCategory, NodeDescriptor, NodeHandler, NodeTypeRegistry,
    };
    use crate::workflow::types::{NodeStatus, Position, Settings};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Handler that fails its first `failures` invocations, then echoes.
    struct Flaky {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl NodeHandler for Flaky {
        async fn run(
            &self,
            _config: &Value,
            inputs: &Value,
            _ctx: &ExecutionContext,
        ) -> Result<Value, EngineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(EngineError::handler(format!("flaky failure #{call}")))
            } else {
                Ok(crate::nodes::primary_input(inputs))
            }
        }
    }

    fn engine_with_registry(extra: impl FnOnce(&mut NodeTypeRegistry)) -> WorkflowEngine {
        let mut registry = NodeTypeRegistry::new();
        triggers::register(&mut registry);
        crate::nodes::logic::register(&mut registry);
        crate::nodes::data::register(&mut registry);
        extra(&mut registry);
        WorkflowEngine::new(Arc::new(NodeExecutor::new(Arc::new(registry))))
    }

    fn engine() -> WorkflowEngine {
        engine_with_registry(|_| {})
    }

    fn node(id: &str, node_type: &str, config: Value) -> Node {
        Node {
            id: id.to_string(),
            node_type: node_type.to_string(),
            label: String::new(),
            config,
            position: Position::default(),
        }
    }

    fn edge(id: &str, source: &str, target: &str, handle: Option<&str>) -> Edge {
        Edge {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: handle.map(str::to_string),
            condition: None,
        }
    }

    fn definition(nodes: Vec<Node>, edges: Vec<Edge>, settings: Settings) -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf-test".to_string(),
            name: "test workflow".to_string(),
            nodes,
            edges,
            variables: Map::new(),
            settings,
        }
    }

    fn statuses(result: &ExecutionResult) -> Vec<(&str, NodeStatus)> {
        result
            .node_results
            .iter()
            .map(|r| (r.node_id.as_str(), r.status))
            .collect()
    }

    #[tokio::test]
    async fn linear_flow_visits_in_dependency_order() {
        let def = definition(
            vec![
                node("t", "manual_trigger", json!({})),
                node("a", "transform", json!({"expression": "data * 2"})),
                node("b", "transform", json!({"expression": "data + 1"})),
            ],
            vec![edge("e1", "t", "a", None), edge("e2", "a", "b", None)],
            Settings::default(),
        );

        let result = engine().run(&def, json!(10)).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(
            statuses(&result),
            vec![
                ("t", NodeStatus::Success),
                ("a", NodeStatus::Success),
                ("b", NodeStatus::Success),
            ]
        );
        assert_eq!(result.final_output(), Some(&json!(21)));
    }

    #[tokio::test]
    async fn condition_prunes_the_untaken_branch() {
        let def = definition(
            vec![
                node("t", "manual_trigger", json!({})),
                node("c", "condition", json!({"expression": "data.x > 1"})),
                node("yes", "transform", json!({"expression": "\"taken\""})),
                node("no", "transform", json!({"expression": "\"not taken\""})),
            ],
            vec![
                edge("e1", "t", "c", None),
                edge("e2", "c", "yes", Some("true")),
                edge("e3", "c", "no", Some("false")),
            ],
            Settings::default(),
        );

        let result = engine().run(&def, json!({"x": 5})).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        let by_id: HashMap<_, _> = statuses(&result).into_iter().collect();
        assert_eq!(by_id["yes"], NodeStatus::Success);
        assert_eq!(by_id["no"], NodeStatus::Skipped);

        // each reachable node appears exactly once
        assert_eq!(result.node_results.len(), 4);
    }

    #[tokio::test]
    async fn join_node_reachable_through_either_branch_runs_once() {
        let def = definition(
            vec![
                node("t", "manual_trigger", json!({})),
                node("c", "condition", json!({"expression": "data.x > 1"})),
                node("yes", "transform", json!({"expression": "1"})),
                node("no", "transform", json!({"expression": "2"})),
                node("join", "merge", json!({})),
            ],
            vec![
                edge("e1", "t", "c", None),
                edge("e2", "c", "yes", Some("true")),
                edge("e3", "c", "no", Some("false")),
                edge("e4", "yes", "join", None),
                edge("e5", "no", "join", None),
            ],
            Settings::default(),
        );

        let result = engine().run(&def, json!({"x": 5})).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        let join_results: Vec<_> = result
            .node_results
            .iter()
            .filter(|r| r.node_id == "join")
            .collect();
        assert_eq!(join_results.len(), 1);
        assert_eq!(join_results[0].status, NodeStatus::Success);
    }

    #[tokio::test]
    async fn stop_policy_halts_and_skips_the_rest() {
        let def = definition(
            vec![
                node("t", "manual_trigger", json!({})),
                node("bad", "transform", json!({"expression": "("})),
                node("after", "transform", json!({"expression": "data"})),
            ],
            vec![edge("e1", "t", "bad", None), edge("e2", "bad", "after", None)],
            Settings::default(),
        );

        let result = engine().run(&def, json!(1)).await.unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(
            statuses(&result),
            vec![
                ("t", NodeStatus::Success),
                ("bad", NodeStatus::Error),
                ("after", NodeStatus::Skipped),
            ]
        );
        let failed = &result.node_results[1];
        assert!(failed.error.as_deref().unwrap().contains("expression"));
    }

    #[tokio::test]
    async fn skip_policy_continues_with_error_marker() {
        let def = definition(
            vec![
                node("t", "manual_trigger", json!({})),
                node("bad", "transform", json!({"expression": "("})),
                node(
                    "rescue",
                    "error_handler",
                    json!({"fallback": {"patched": true}}),
                ),
            ],
            vec![
                edge("e1", "t", "bad", None),
                edge("e2", "bad", "rescue", None),
            ],
            Settings {
                error_handling: ErrorHandling::Skip,
                ..Settings::default()
            },
        );

        let result = engine().run(&def, json!(1)).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        let by_id: HashMap<_, _> = statuses(&result).into_iter().collect();
        assert_eq!(by_id["bad"], NodeStatus::Error);
        assert_eq!(by_id["rescue"], NodeStatus::Success);
        assert_eq!(result.final_output(), Some(&json!({"patched": true})));
    }

    #[tokio::test]
    async fn retry_policy_reinvokes_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_handler = Arc::clone(&calls);
        let engine = engine_with_registry(move |registry| {
            registry.register(
                NodeDescriptor::new("flaky", "Flaky", NodeCategory::Data),
                Arc::new(Flaky {
                    failures: 2,
                    calls: calls_in_handler,
                }),
            );
        });

        let def = definition(
            vec![
                node("t", "manual_trigger", json!({})),
                node("f", "flaky", json!({})),
            ],
            vec![edge("e1", "t", "f", None)],
            Settings {
                error_handling: ErrorHandling::Retry,
                max_retries: 3,
                ..Settings::default()
            },
        );

        let result = engine.run(&def, json!("payload")).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.final_output(), Some(&json!("payload")));
    }

    #[tokio::test]
    async fn retry_exhaustion_falls_back_to_stop() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_handler = Arc::clone(&calls);
        let engine = engine_with_registry(move |registry| {
            registry.register(
                NodeDescriptor::new("flaky", "Flaky", NodeCategory::Data),
                Arc::new(Flaky {
                    failures: 10,
                    calls: calls_in_handler,
                }),
            );
        });

        let def = definition(
            vec![
                node("t", "manual_trigger", json!({})),
                node("f", "flaky", json!({})),
                node("after", "transform", json!({"expression": "data"})),
            ],
            vec![edge("e1", "t", "f", None), edge("e2", "f", "after", None)],
            Settings {
                error_handling: ErrorHandling::Retry,
                max_retries: 2,
                ..Settings::default()
            },
        );

        let result = engine.run(&def, json!(1)).await.unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
        let by_id: HashMap<_, _> = statuses(&result).into_iter().collect();
        assert_eq!(by_id["after"], NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn validation_failures_precede_any_run_state() {
        let engine = engine();

        // no trigger node
        let def = definition(
            vec![node("a", "transform", json!({"expression": "1"}))],
            vec![],
            Settings::default(),
        );
        assert!(matches!(
            engine.run(&def, json!(null)).await,
            Err(EngineError::Validation(_))
        ));

        // dangling edge
        let def = definition(
            vec![node("t", "manual_trigger", json!({}))],
            vec![edge("e1", "t", "ghost", None)],
            Settings::default(),
        );
        assert!(matches!(
            engine.validate(&def),
            Err(EngineError::Validation(_))
        ));

        // cycle between non-trigger nodes
        let def = definition(
            vec![
                node("t", "manual_trigger", json!({})),
                node("a", "transform", json!({"expression": "data"})),
                node("b", "transform", json!({"expression": "data"})),
            ],
            vec![
                edge("e1", "t", "a", None),
                edge("e2", "a", "b", None),
                edge("e3", "b", "a", None),
            ],
            Settings::default(),
        );
        assert!(matches!(
            engine.run(&def, json!(null)).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn variables_flow_through_shared_context() {
        let def = definition(
            vec![
                node("t", "manual_trigger", json!({})),
                node("set", "set_variable", json!({"name": "greeting", "value": "hi"})),
                node(
                    "render",
                    "template",
                    json!({"template": "{{vars.greeting}} {{name}}"}),
                ),
            ],
            vec![
                edge("e1", "t", "set", None),
                edge("e2", "set", "render", None),
            ],
            Settings::default(),
        );

        let result = engine().run(&def, json!({"name": "world"})).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        // template sees the variable written earlier in the same run
        let render = result
            .node_results
            .iter()
            .find(|r| r.node_id == "render")
            .unwrap();
        assert_eq!(render.output, Some(json!("hi world")));
    }
}
