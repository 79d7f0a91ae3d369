//! End-to-end runs through the built-in registry: trigger to terminal
//! report, branching, and webhook dispatch into the engine.

use async_trait::async_trait;
use pipewright::ai::{ChatMessage, Completion, CompletionClient, CompletionOptions, Usage};
use pipewright::error::EngineError;
use pipewright::nodes::{builtin_registry, HandlerResources};
use pipewright::runtime::webhook::WebhookCallback;
use pipewright::runtime::{NodeExecutor, WebhookRouter, WorkflowEngine};
use pipewright::workflow::types::{NodeStatus, RunStatus};
use pipewright::WorkflowDefinition;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::sync::Arc;

/// Completion stub: classify-style replies without a network.
struct CannedCompletion;

#[async_trait]
impl CompletionClient for CannedCompletion {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<Completion, EngineError> {
        Ok(Completion {
            content: r#"{"category": "urgent", "confidence": 0.87}"#.to_string(),
            usage: Usage::default(),
        })
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EngineError> {
        Ok(vec![0.0; 8])
    }
}

async fn engine_with_builtins() -> Arc<WorkflowEngine> {
    let data_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    let resources = HandlerResources {
        completion: Arc::new(CannedCompletion),
        data_pool,
        http: reqwest::Client::new(),
    };
    let registry = Arc::new(builtin_registry(&resources));
    Arc::new(WorkflowEngine::new(Arc::new(NodeExecutor::new(registry))))
}

fn definition(raw: Value) -> WorkflowDefinition {
    serde_json::from_value(raw).unwrap()
}

#[tokio::test]
async fn triage_workflow_classifies_and_branches() {
    let engine = engine_with_builtins().await;

    let def = definition(json!({
        "id": "wf-triage",
        "name": "ticket triage",
        "nodes": [
            {"id": "in", "type": "webhook_trigger", "config": {"path": "/tickets", "method": "POST"}},
            {"id": "classify", "type": "ai_classify", "config": {"categories": ["urgent", "routine"]}},
            {"id": "is_urgent", "type": "condition", "config": {"expression": "data.category == \"urgent\""}},
            {"id": "page", "type": "template", "config": {"template": "PAGE: {{value.category}}"}},
            {"id": "log", "type": "template", "config": {"template": "queued"}}
        ],
        "edges": [
            {"id": "e1", "source": "in", "target": "classify"},
            {"id": "e2", "source": "classify", "target": "is_urgent"},
            {"id": "e3", "source": "is_urgent", "target": "page", "sourceHandle": "true"},
            {"id": "e4", "source": "is_urgent", "target": "log", "sourceHandle": "false"}
        ]
    }));

    let result = engine
        .run(&def, json!({"subject": "prod is down"}))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);

    let by_id: HashMap<&str, NodeStatus> = result
        .node_results
        .iter()
        .map(|r| (r.node_id.as_str(), r.status))
        .collect();
    assert_eq!(by_id["in"], NodeStatus::Success);
    assert_eq!(by_id["classify"], NodeStatus::Success);
    assert_eq!(by_id["page"], NodeStatus::Success);
    assert_eq!(by_id["log"], NodeStatus::Skipped);

    assert_eq!(result.final_output(), Some(&json!("PAGE: urgent")));

    // every reachable node reported exactly once, in dependency order
    let order: Vec<&str> = result
        .node_results
        .iter()
        .map(|r| r.node_id.as_str())
        .collect();
    assert_eq!(order.len(), 5);
    let pos = |id: &str| order.iter().position(|n| *n == id).unwrap();
    assert!(pos("in") < pos("classify"));
    assert!(pos("classify") < pos("is_urgent"));
    assert!(pos("is_urgent") < pos("page"));
}

#[tokio::test]
async fn aggregation_pipeline_over_split_input() {
    let engine = engine_with_builtins().await;

    let def = definition(json!({
        "id": "wf-sum",
        "name": "sum the line",
        "nodes": [
            {"id": "in", "type": "manual_trigger", "config": {}},
            {"id": "split", "type": "split", "config": {"delimiter": ","}},
            {"id": "total", "type": "aggregate", "config": {"operation": "sum"}}
        ],
        "edges": [
            {"id": "e1", "source": "in", "target": "split"},
            {"id": "e2", "source": "split", "target": "total"}
        ]
    }));

    let result = engine.run(&def, json!("3, abc, 5")).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.final_output(), Some(&json!(8.0)));
}

#[tokio::test]
async fn webhook_dispatch_runs_the_bound_workflow() {
    let engine = engine_with_builtins().await;

    let def = Arc::new(definition(json!({
        "id": "wf-echo",
        "name": "echo",
        "nodes": [
            {"id": "in", "type": "webhook_trigger", "config": {"path": "/echo", "method": "POST"}},
            {"id": "wrap", "type": "transform", "config": {"expression": "{received = data}"}}
        ],
        "edges": [
            {"id": "e1", "source": "in", "target": "wrap"}
        ]
    })));

    let callback: WebhookCallback = {
        let engine = Arc::clone(&engine);
        let def = Arc::clone(&def);
        Arc::new(move |request| {
            let engine = Arc::clone(&engine);
            let def = Arc::clone(&def);
            Box::pin(async move {
                let result = engine.run(&def, request.body).await?;
                Ok(serde_json::to_value(&result)?)
            })
        })
    };
    let router = WebhookRouter::new(callback);
    router.register("wf-echo", "echo", "post").await;

    let response = router
        .handle("/echo", "POST", HashMap::new(), json!({"n": 1}))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body["workflowId"], json!("wf-echo"));
    let run: Value = response.body["result"].clone();
    assert_eq!(run["status"], json!("completed"));

    // unmatched path stays null
    assert!(router
        .handle("/other", "POST", HashMap::new(), json!({}))
        .await
        .is_none());
}
