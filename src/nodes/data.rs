//! Data node handlers: transforms, templating, JSON plumbing, aggregation.

use super::{
    opt_str, primary_input, require_str, script, NodeCategory, NodeDescriptor, NodeHandler,
    NodeTypeRegistry,
};
use crate::error::EngineError;
use crate::workflow::types::ExecutionContext;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn register(registry: &mut NodeTypeRegistry) {
    registry.register(
        NodeDescriptor::new("transform", "Transform", NodeCategory::Data)
            .field("expression", true),
        Arc::new(Transform),
    );
    registry.register(
        NodeDescriptor::new("code", "Code", NodeCategory::Data).field("script", true),
        Arc::new(Code),
    );
    registry.register(
        NodeDescriptor::new("template", "Template", NodeCategory::Data).field("template", true),
        Arc::new(Template),
    );
    registry.register(
        NodeDescriptor::new("json_parse", "Parse JSON", NodeCategory::Data),
        Arc::new(JsonParse),
    );
    registry.register(
        NodeDescriptor::new("json_stringify", "Stringify JSON", NodeCategory::Data)
            .field("pretty", false),
        Arc::new(JsonStringify),
    );
    registry.register(
        NodeDescriptor::new("split", "Split Text", NodeCategory::Data).field("delimiter", false),
        Arc::new(Split),
    );
    registry.register(
        NodeDescriptor::new("aggregate", "Aggregate", NodeCategory::Data)
            .field("operation", true),
        Arc::new(Aggregate),
    );
    registry.register(
        NodeDescriptor::new("set_variable", "Set Variable", NodeCategory::Data)
            .field("name", true)
            .field("value", false),
        Arc::new(SetVariable),
    );
}

/// Expression-based transform. Unlike the condition node, an evaluation
/// failure here fails the node.
struct Transform;

#[async_trait]
impl NodeHandler for Transform {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let expression = require_str(config, "expression")?;
        let data = primary_input(inputs);
        let vars = Value::Object(ctx.snapshot().await);
        script::eval_expression(expression, &data, &vars)
    }
}

/// Multi-statement Lua script with the same two bindings as `transform`.
/// A script error fails the node.
struct Code;

#[async_trait]
impl NodeHandler for Code {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let script_src = require_str(config, "script")?;
        let data = primary_input(inputs);
        let vars = Value::Object(ctx.snapshot().await);
        script::eval_expression(script_src, &data, &vars)
    }
}

/// Renders `{{dotted.path}}` placeholders against the input data and the run
/// variables (under the `vars.` prefix). A missing path renders as the empty
/// string, not an error.
struct Template;

#[async_trait]
impl NodeHandler for Template {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let template = require_str(config, "template")?;
        let data = primary_input(inputs);
        let vars = Value::Object(ctx.snapshot().await);

        let placeholder = Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}")
            .map_err(|e| EngineError::handler(format!("template engine setup failed: {e}")))?;

        let rendered = placeholder.replace_all(template, |caps: &regex::Captures| {
            lookup_path(&data, &vars, &caps[1])
        });

        Ok(Value::String(rendered.into_owned()))
    }
}

/// Dotted-path lookup. Paths starting with `vars.` read the run variables;
/// everything else reads the input data.
fn lookup_path(data: &Value, vars: &Value, path: &str) -> String {
    let (root, rest) = match path.strip_prefix("vars.") {
        Some(rest) => (vars, rest),
        None => (data, path),
    };

    let mut current = root;
    for segment in rest.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }

    super::value_to_text(current)
}

struct JsonParse;

#[async_trait]
impl NodeHandler for JsonParse {
    async fn run(
        &self,
        _config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let data = primary_input(inputs);
        let text = data
            .as_str()
            .ok_or_else(|| EngineError::handler("json_parse expects string input"))?;
        serde_json::from_str(text)
            .map_err(|e| EngineError::handler(format!("malformed JSON input: {e}")))
    }
}

struct JsonStringify;

#[async_trait]
impl NodeHandler for JsonStringify {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let data = primary_input(inputs);
        let pretty = config.get("pretty").and_then(|p| p.as_bool()).unwrap_or(false);
        let text = if pretty {
            serde_json::to_string_pretty(&data)
        } else {
            serde_json::to_string(&data)
        }
        .map_err(|e| EngineError::handler(format!("serialization failed: {e}")))?;
        Ok(Value::String(text))
    }
}

/// Splits a string on a delimiter, trimming each piece.
struct Split;

#[async_trait]
impl NodeHandler for Split {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let delimiter = opt_str(config, "delimiter").unwrap_or(",");
        let data = primary_input(inputs);
        let text = data
            .as_str()
            .ok_or_else(|| EngineError::handler("split expects string input"))?;

        let pieces: Vec<Value> = text
            .split(delimiter)
            .map(|p| Value::String(p.trim().to_string()))
            .collect();
        Ok(Value::Array(pieces))
    }
}

/// Array aggregation. Numeric operations coerce entries leniently (numbers
/// pass, numeric strings parse) and drop everything that does not coerce;
/// the policy is uniform across sum/avg/min/max.
struct Aggregate;

#[async_trait]
impl NodeHandler for Aggregate {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let operation = require_str(config, "operation")?;
        let items = match primary_input(inputs) {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };

        let numbers: Vec<f64> = items.iter().filter_map(coerce_number).collect();

        let result = match operation {
            "sum" => json!(numbers.iter().sum::<f64>()),
            "avg" => {
                if numbers.is_empty() {
                    json!(0)
                } else {
                    json!(numbers.iter().sum::<f64>() / numbers.len() as f64)
                }
            }
            "min" => numbers
                .iter()
                .copied()
                .fold(None::<f64>, |acc, n| Some(acc.map_or(n, |a| a.min(n))))
                .map(|n| json!(n))
                .unwrap_or(Value::Null),
            "max" => numbers
                .iter()
                .copied()
                .fold(None::<f64>, |acc, n| Some(acc.map_or(n, |a| a.max(n))))
                .map(|n| json!(n))
                .unwrap_or(Value::Null),
            "count" => json!(items.len()),
            "concat" => Value::Array(
                items
                    .into_iter()
                    .flat_map(|v| match v {
                        Value::Array(inner) => inner,
                        other => vec![other],
                    })
                    .collect(),
            ),
            other => {
                return Err(EngineError::handler(format!(
                    "unknown aggregate operation '{other}'"
                )))
            }
        };

        Ok(result)
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Writes a run variable; the sanctioned context mutation. The input data
/// passes through unchanged so the node can sit in the middle of a chain.
struct SetVariable;

#[async_trait]
impl NodeHandler for SetVariable {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let name = require_str(config, "name")?;
        let data = primary_input(inputs);
        let value = config.get("value").cloned().unwrap_or_else(|| data.clone());

        ctx.set(name, value).await;
        Ok(data)
    }
}
