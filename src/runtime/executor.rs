//! Node executor: single-handler invocation with timeout enforcement.

use crate::error::EngineError;
use crate::nodes::NodeTypeRegistry;
use crate::workflow::types::ExecutionContext;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Uniform envelope around one successful handler invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub output: Value,
    pub duration_ms: u64,
    pub node_type: String,
}

/// Invokes node handlers from the registry, racing each invocation against
/// the configured timeout.
pub struct NodeExecutor {
    registry: Arc<NodeTypeRegistry>,
}

impl NodeExecutor {
    pub fn new(registry: Arc<NodeTypeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &NodeTypeRegistry {
        &self.registry
    }

    /// Invoke the handler registered for `node_type`.
    ///
    /// The handler runs as its own task so that losing the timeout race only
    /// stops the engine from waiting: the handler's in-flight work is not
    /// aborted, and any side effects it eventually produces still land. The
    /// late result is discarded.
    pub async fn invoke(
        &self,
        node_type: &str,
        config: Value,
        inputs: Value,
        ctx: ExecutionContext,
        timeout_ms: u64,
    ) -> Result<Invocation, EngineError> {
        let handler = self
            .registry
            .handler(node_type)
            .ok_or_else(|| EngineError::UnknownNodeType(node_type.to_string()))?;

        let started = Instant::now();
        let task =
            tokio::spawn(async move { handler.run(&config, &inputs, &ctx).await });

        match tokio::time::timeout(Duration::from_millis(timeout_ms), task).await {
            Ok(Ok(Ok(output))) => Ok(Invocation {
                output,
                duration_ms: started.elapsed().as_millis() as u64,
                node_type: node_type.to_string(),
            }),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(join_error)) => Err(EngineError::handler(format!(
                "handler for '{node_type}' panicked: {join_error}"
            ))),
            Err(_) => {
                tracing::warn!(
                    "⏱️ node type '{}' exceeded {}ms; abandoning the wait",
                    node_type,
                    timeout_ms
                );
                Err(EngineError::NodeTimeout { timeout_ms })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{NodeCategory, NodeDescriptor, NodeHandler};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SlowHandler {
        delay_ms: u64,
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl NodeHandler for SlowHandler {
        async fn run(
            &self,
            _config: &Value,
            _inputs: &Value,
            _ctx: &ExecutionContext,
        ) -> Result<Value, EngineError> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(json!("done"))
        }
    }

    fn executor_with_slow_handler(delay_ms: u64, finished: Arc<AtomicBool>) -> NodeExecutor {
        let mut registry = NodeTypeRegistry::new();
        registry.register(
            NodeDescriptor::new("slow", "Slow", NodeCategory::Data),
            Arc::new(SlowHandler { delay_ms, finished }),
        );
        NodeExecutor::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn unknown_type_is_reported() {
        let executor = NodeExecutor::new(Arc::new(NodeTypeRegistry::new()));
        let err = executor
            .invoke("ghost", json!({}), json!({}), ExecutionContext::new(), 1_000)
            .await;
        assert!(matches!(err, Err(EngineError::UnknownNodeType(t)) if t == "ghost"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_before_slow_handler_settles() {
        let finished = Arc::new(AtomicBool::new(false));
        let executor = executor_with_slow_handler(500, Arc::clone(&finished));

        let started = tokio::time::Instant::now();
        let err = executor
            .invoke("slow", json!({}), json!({}), ExecutionContext::new(), 50)
            .await;

        assert!(matches!(err, Err(EngineError::NodeTimeout { timeout_ms: 50 })));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_handler_still_completes_its_work() {
        let finished = Arc::new(AtomicBool::new(false));
        let executor = executor_with_slow_handler(500, Arc::clone(&finished));

        let _ = executor
            .invoke("slow", json!({}), json!({}), ExecutionContext::new(), 50)
            .await;

        // The spawned task was not aborted; give it time to run to the end.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn fast_handler_returns_invocation_envelope() {
        let finished = Arc::new(AtomicBool::new(false));
        let executor = executor_with_slow_handler(0, Arc::clone(&finished));

        let invocation = executor
            .invoke("slow", json!({}), json!({}), ExecutionContext::new(), 1_000)
            .await
            .unwrap();
        assert_eq!(invocation.output, json!("done"));
        assert_eq!(invocation.node_type, "slow");
    }
}
