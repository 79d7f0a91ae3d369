//! Sandboxed Lua expression evaluation.
//!
//! Expression-bearing nodes (condition, transform, filter) evaluate a
//! user-supplied Lua expression with exactly two bindings: `data` (the node's
//! resolved input) and `vars` (the run's shared variables). The Lua state is
//! created fresh per evaluation and stripped of every global that can reach
//! the host: no os, no io, no filesystem, no module loading.

use crate::error::EngineError;
use mlua::{Lua, LuaSerdeExt};
use serde_json::Value;

/// Globals removed from every evaluation state.
const BLOCKED_GLOBALS: &[&str] = &[
    "os",
    "io",
    "debug",
    "package",
    "require",
    "load",
    "loadstring",
    "dofile",
    "loadfile",
    "collectgarbage",
];

/// Evaluate a Lua expression against the node's input and the run variables.
///
/// The expression sees `data` and `vars` and must yield a value. Returns
/// `EngineError::Handler` on syntax errors, runtime errors, or when the
/// result cannot be represented as JSON.
pub fn eval_expression(expr: &str, data: &Value, vars: &Value) -> Result<Value, EngineError> {
    let lua = sandboxed_lua(data, vars)?;

    let result: mlua::Value = lua
        .load(expr)
        .eval()
        .map_err(|e| EngineError::handler(format!("expression evaluation failed: {e}")))?;

    lua_to_json(&result)
}

/// Evaluate a predicate expression, coercing the result to a boolean.
///
/// Evaluation failure degrades to `false` rather than failing the node; the
/// condition and filter nodes rely on this.
pub fn eval_predicate(expr: &str, data: &Value, vars: &Value) -> bool {
    match eval_expression(expr, data, vars) {
        Ok(value) => truthy(&value),
        Err(e) => {
            tracing::warn!("predicate '{}' failed, treating as false: {}", expr, e);
            false
        }
    }
}

/// Lua-style truthiness: nil and false are false, everything else is true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        _ => true,
    }
}

fn sandboxed_lua(data: &Value, vars: &Value) -> Result<Lua, EngineError> {
    let lua = Lua::new();
    let globals = lua.globals();

    for name in BLOCKED_GLOBALS {
        globals
            .set(*name, mlua::Nil)
            .map_err(|e| EngineError::handler(format!("sandbox setup failed: {e}")))?;
    }

    let data_value = lua
        .to_value(data)
        .map_err(|e| EngineError::handler(format!("could not bind input data: {e}")))?;
    let vars_value = lua
        .to_value(vars)
        .map_err(|e| EngineError::handler(format!("could not bind variables: {e}")))?;

    globals
        .set("data", data_value)
        .and_then(|_| globals.set("vars", vars_value))
        .map_err(|e| EngineError::handler(format!("sandbox setup failed: {e}")))?;

    Ok(lua)
}

/// Convert a Lua value back to JSON.
///
/// Tables with a contiguous 1..n integer key range become arrays, everything
/// else becomes an object. Unrepresentable values (functions, userdata)
/// become null.
fn lua_to_json(value: &mlua::Value) -> Result<Value, EngineError> {
    match value {
        mlua::Value::Nil => Ok(Value::Null),
        mlua::Value::Boolean(b) => Ok(Value::Bool(*b)),
        mlua::Value::Integer(i) => Ok(Value::Number((*i).into())),
        mlua::Value::Number(f) => Ok(serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        mlua::Value::String(s) => {
            let text = s
                .to_str()
                .map_err(|e| EngineError::handler(format!("invalid UTF-8 in result: {e}")))?;
            Ok(Value::String(text.to_string()))
        }
        mlua::Value::Table(table) => {
            let len = table.raw_len();
            let mut is_array = len > 0;
            let mut count = 0usize;
            for pair in table.clone().pairs::<mlua::Value, mlua::Value>() {
                let (key, _) =
                    pair.map_err(|e| EngineError::handler(format!("table iteration failed: {e}")))?;
                count += 1;
                match key {
                    mlua::Value::Integer(i) if i >= 1 && (i as usize) <= len => {}
                    _ => {
                        is_array = false;
                        break;
                    }
                }
            }

            if is_array && count == len {
                let mut items = Vec::with_capacity(len);
                for i in 1..=len {
                    let item: mlua::Value = table
                        .get(i)
                        .map_err(|e| EngineError::handler(format!("table read failed: {e}")))?;
                    items.push(lua_to_json(&item)?);
                }
                Ok(Value::Array(items))
            } else {
                let mut obj = serde_json::Map::new();
                for pair in table.clone().pairs::<mlua::Value, mlua::Value>() {
                    let (key, val) = pair
                        .map_err(|e| EngineError::handler(format!("table iteration failed: {e}")))?;
                    let key = match key {
                        mlua::Value::String(s) => s
                            .to_str()
                            .map_err(|e| {
                                EngineError::handler(format!("invalid UTF-8 in key: {e}"))
                            })?
                            .to_string(),
                        mlua::Value::Integer(i) => i.to_string(),
                        mlua::Value::Number(f) => f.to_string(),
                        _ => continue,
                    };
                    obj.insert(key, lua_to_json(&val)?);
                }
                Ok(Value::Object(obj))
            }
        }
        _ => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arithmetic_over_input_data() {
        let out = eval_expression("data.score * 2", &json!({"score": 21}), &json!({})).unwrap();
        assert_eq!(out, json!(42));
    }

    #[test]
    fn variables_visible_as_vars() {
        let out = eval_expression(
            "vars.prefix .. data.name",
            &json!({"name": "world"}),
            &json!({"prefix": "hello "}),
        )
        .unwrap();
        assert_eq!(out, json!("hello world"));
    }

    #[test]
    fn tables_convert_to_arrays_and_objects() {
        let out = eval_expression("{1, 2, 3}", &Value::Null, &json!({})).unwrap();
        assert_eq!(out, json!([1, 2, 3]));

        let out = eval_expression("{a = 1, b = \"x\"}", &Value::Null, &json!({})).unwrap();
        assert_eq!(out, json!({"a": 1, "b": "x"}));
    }

    #[test]
    fn blocked_globals_are_gone() {
        let err = eval_expression("os.time()", &Value::Null, &json!({}));
        assert!(err.is_err());

        let err = eval_expression("io.open('/etc/passwd')", &Value::Null, &json!({}));
        assert!(err.is_err());
    }

    #[test]
    fn predicate_failure_degrades_to_false() {
        assert!(!eval_predicate("this is not lua", &Value::Null, &json!({})));
        assert!(eval_predicate("data.x > 1", &json!({"x": 5}), &json!({})));
        assert!(!eval_predicate("data.x > 1", &json!({"x": 0}), &json!({})));
    }

    #[test]
    fn syntax_error_fails_expression() {
        assert!(eval_expression("][", &Value::Null, &json!({})).is_err());
    }
}
