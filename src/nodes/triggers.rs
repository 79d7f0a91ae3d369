//! Trigger node handlers.
//!
//! Triggers produce the initial payload for a run. The engine hands them the
//! run initiator's payload under the `data` input; they never read upstream
//! node outputs.

use super::{NodeCategory, NodeDescriptor, NodeHandler, NodeTypeRegistry};
use crate::error::EngineError;
use crate::workflow::types::ExecutionContext;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn register(registry: &mut NodeTypeRegistry) {
    registry.register(
        NodeDescriptor::new("manual_trigger", "Manual Trigger", NodeCategory::Trigger),
        Arc::new(ManualTrigger),
    );
    registry.register(
        NodeDescriptor::new("webhook_trigger", "Webhook Trigger", NodeCategory::Trigger)
            .field("path", true)
            .field("method", false),
        Arc::new(WebhookTrigger),
    );
    registry.register(
        NodeDescriptor::new("schedule_trigger", "Schedule Trigger", NodeCategory::Trigger)
            .field("schedule", true),
        Arc::new(ScheduleTrigger),
    );
    registry.register(
        NodeDescriptor::new("event_trigger", "Event Trigger", NodeCategory::Trigger)
            .field("event", true),
        Arc::new(EventTrigger),
    );
    registry.register(
        NodeDescriptor::new("chat_trigger", "Chat Trigger", NodeCategory::Trigger),
        Arc::new(ChatTrigger),
    );
}

fn trigger_payload(inputs: &Value) -> Value {
    inputs.get("data").cloned().unwrap_or(Value::Null)
}

/// Echoes the payload of a manual invocation.
struct ManualTrigger;

#[async_trait]
impl NodeHandler for ManualTrigger {
    async fn run(
        &self,
        _config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        Ok(trigger_payload(inputs))
    }
}

/// Passes the inbound webhook body through as the run payload.
struct WebhookTrigger;

#[async_trait]
impl NodeHandler for WebhookTrigger {
    async fn run(
        &self,
        _config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        Ok(trigger_payload(inputs))
    }
}

/// Emits firing metadata for a scheduled run.
struct ScheduleTrigger;

#[async_trait]
impl NodeHandler for ScheduleTrigger {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        Ok(json!({
            "trigger": "schedule",
            "schedule": config.get("schedule").cloned().unwrap_or(Value::Null),
            "firedAt": chrono::Utc::now().to_rfc3339(),
            "data": trigger_payload(inputs),
        }))
    }
}

/// Wraps a named-event payload.
struct EventTrigger;

#[async_trait]
impl NodeHandler for EventTrigger {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let event = super::require_str(config, "event")?;
        Ok(json!({
            "event": event,
            "payload": trigger_payload(inputs),
        }))
    }
}

/// Wraps an inbound chat message.
struct ChatTrigger;

#[async_trait]
impl NodeHandler for ChatTrigger {
    async fn run(
        &self,
        _config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        Ok(json!({ "message": trigger_payload(inputs) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_trigger_echoes_payload() {
        let ctx = ExecutionContext::new();
        let out = ManualTrigger
            .run(&json!({}), &json!({"data": {"hello": 1}}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!({"hello": 1}));
    }

    #[tokio::test]
    async fn event_trigger_requires_event_name() {
        let ctx = ExecutionContext::new();
        let err = EventTrigger.run(&json!({}), &json!({}), &ctx).await;
        assert!(err.is_err());

        let out = EventTrigger
            .run(&json!({"event": "user.created"}), &json!({"data": 7}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["event"], json!("user.created"));
        assert_eq!(out["payload"], json!(7));
    }
}
