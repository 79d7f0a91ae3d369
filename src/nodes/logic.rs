//! Logic node handlers: branching, iteration, delays, merging.

use super::{
    branch_output, has_error_marker, opt_str, opt_u64, primary_input, require_str, script,
    upstream_inputs, NodeCategory, NodeDescriptor, NodeHandler, NodeTypeRegistry,
};
use crate::error::EngineError;
use crate::workflow::types::ExecutionContext;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for the delay node, in milliseconds.
const MAX_DELAY_MS: u64 = 300_000;

const DEFAULT_MAX_ITERATIONS: u64 = 100;

pub fn register(registry: &mut NodeTypeRegistry) {
    registry.register(
        NodeDescriptor::new("condition", "If", NodeCategory::Logic)
            .field("expression", true)
            .outputs(&["true", "false"]),
        Arc::new(Condition),
    );
    registry.register(
        NodeDescriptor::new("switch", "Switch", NodeCategory::Logic)
            .field("expression", false)
            .field("cases", true)
            .outputs(&["default"]),
        Arc::new(Switch),
    );
    registry.register(
        NodeDescriptor::new("loop", "Loop", NodeCategory::Logic).field("maxIterations", false),
        Arc::new(Loop),
    );
    registry.register(
        NodeDescriptor::new("delay", "Delay", NodeCategory::Logic).field("duration", true),
        Arc::new(Delay),
    );
    registry.register(
        NodeDescriptor::new("merge", "Merge", NodeCategory::Logic).field("mode", false),
        Arc::new(Merge),
    );
    registry.register(
        NodeDescriptor::new("filter", "Filter", NodeCategory::Logic).field("expression", true),
        Arc::new(Filter),
    );
    registry.register(
        NodeDescriptor::new("error_handler", "Error Handler", NodeCategory::Logic)
            .field("fallback", false),
        Arc::new(ErrorHandler),
    );
}

/// Boolean branch: evaluates the configured expression against the input and
/// emits the "true" or "false" discriminator. Evaluation failure degrades to
/// the "false" branch.
struct Condition;

#[async_trait]
impl NodeHandler for Condition {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let expression = require_str(config, "expression")?;
        let data = primary_input(inputs);
        let vars = Value::Object(ctx.snapshot().await);

        let taken = script::eval_predicate(expression, &data, &vars);
        Ok(branch_output(if taken { "true" } else { "false" }, data))
    }
}

/// Multi-way branch: matches a value against configured {value, label} cases
/// and emits the matching case's label, or "default".
struct Switch;

#[async_trait]
impl NodeHandler for Switch {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let cases = config
            .get("cases")
            .and_then(|c| c.as_array())
            .ok_or_else(|| EngineError::handler("missing required config 'cases'"))?;

        let data = primary_input(inputs);
        let subject = match opt_str(config, "expression") {
            Some(expr) => {
                let vars = Value::Object(ctx.snapshot().await);
                script::eval_expression(expr, &data, &vars)?
            }
            None => data.clone(),
        };

        for case in cases {
            let candidate = case.get("value").cloned().unwrap_or(Value::Null);
            if values_match(&subject, &candidate) {
                let label = case
                    .get("label")
                    .and_then(|l| l.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| super::value_to_text(&candidate));
                return Ok(branch_output(&label, data));
            }
        }

        Ok(branch_output("default", data))
    }
}

/// Case values arrive as JSON; compare strings and numbers loosely so that a
/// numeric subject matches a string-typed case value.
fn values_match(subject: &Value, case: &Value) -> bool {
    if subject == case {
        return true;
    }
    super::value_to_text(subject) == super::value_to_text(case)
}

/// Bounds an input array to `maxIterations` entries.
struct Loop;

#[async_trait]
impl NodeHandler for Loop {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let limit = opt_u64(config, "maxIterations").unwrap_or(DEFAULT_MAX_ITERATIONS) as usize;
        let data = primary_input(inputs);

        let items: Vec<Value> = match data {
            Value::Array(items) => items.into_iter().take(limit).collect(),
            Value::Null => Vec::new(),
            other => vec![other],
        };
        let count = items.len();

        Ok(json!({ "items": items, "count": count }))
    }
}

/// Suspends the run for a clamped duration, then passes the input through.
struct Delay;

#[async_trait]
impl NodeHandler for Delay {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let requested = config
            .get("duration")
            .and_then(|d| d.as_u64())
            .ok_or_else(|| EngineError::handler("missing required config 'duration'"))?;
        let duration = requested.min(MAX_DELAY_MS);

        tokio::time::sleep(Duration::from_millis(duration)).await;
        Ok(primary_input(inputs))
    }
}

/// Combines all upstream outputs. Modes: concat (default), zip, object.
struct Merge;

#[async_trait]
impl NodeHandler for Merge {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let upstream = upstream_inputs(inputs);
        let mode = opt_str(config, "mode").unwrap_or("concat");

        match mode {
            "concat" => {
                let mut merged = Vec::new();
                for (_, value) in upstream {
                    match value {
                        Value::Array(items) => merged.extend(items),
                        Value::Null => {}
                        other => merged.push(other),
                    }
                }
                Ok(Value::Array(merged))
            }
            "zip" => {
                let arrays: Vec<Vec<Value>> = upstream
                    .values()
                    .map(|v| match v {
                        Value::Array(items) => items.clone(),
                        Value::Null => Vec::new(),
                        other => vec![other.clone()],
                    })
                    .collect();
                let shortest = arrays.iter().map(Vec::len).min().unwrap_or(0);
                let zipped: Vec<Value> = (0..shortest)
                    .map(|i| Value::Array(arrays.iter().map(|a| a[i].clone()).collect()))
                    .collect();
                Ok(Value::Array(zipped))
            }
            "object" => Ok(Value::Object(upstream)),
            other => Err(EngineError::handler(format!("unknown merge mode '{other}'"))),
        }
    }
}

/// Keeps the array elements for which the predicate holds. Elements whose
/// evaluation fails are dropped.
struct Filter;

#[async_trait]
impl NodeHandler for Filter {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let expression = require_str(config, "expression")?;
        let vars = Value::Object(ctx.snapshot().await);

        let items = match primary_input(inputs) {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };

        let kept: Vec<Value> = items
            .into_iter()
            .filter(|item| script::eval_predicate(expression, item, &vars))
            .collect();

        Ok(Value::Array(kept))
    }
}

/// Returns the configured fallback when an upstream error marker is present,
/// otherwise passes the input through unchanged.
struct ErrorHandler;

#[async_trait]
impl NodeHandler for ErrorHandler {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let data = primary_input(inputs);
        let failed = has_error_marker(&data)
            || upstream_inputs(inputs).values().any(has_error_marker);

        if failed {
            Ok(config.get("fallback").cloned().unwrap_or(Value::Null))
        } else {
            Ok(data)
        }
    }
}
