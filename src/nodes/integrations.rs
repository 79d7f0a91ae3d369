//! Integration node handlers: outbound HTTP, chat webhooks, database reads,
//! files, RSS.

use super::{
    opt_str, opt_u64, primary_input, require_str, value_to_text, NodeCategory, NodeDescriptor,
    NodeHandler, NodeTypeRegistry,
};
use crate::error::EngineError;
use crate::nodes::HandlerResources;
use crate::workflow::types::ExecutionContext;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use sqlx::{sqlite::SqlitePool, Column, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

const DEFAULT_RSS_LIMIT: u64 = 10;

pub fn register(registry: &mut NodeTypeRegistry, resources: &HandlerResources) {
    registry.register(
        NodeDescriptor::new("http_request", "HTTP Request", NodeCategory::Integration)
            .field("url", true)
            .field("method", false)
            .field("headers", false)
            .field("bearerToken", false)
            .field("body", false),
        Arc::new(HttpRequest {
            http: resources.http.clone(),
        }),
    );
    registry.register(
        NodeDescriptor::new("slack_post", "Slack Message", NodeCategory::Integration)
            .field("webhookUrl", true)
            .field("text", false),
        Arc::new(ChatWebhookPost {
            http: resources.http.clone(),
            url_key: "webhookUrl",
            text_key: "text",
        }),
    );
    registry.register(
        NodeDescriptor::new("discord_post", "Discord Message", NodeCategory::Integration)
            .field("webhookUrl", true)
            .field("content", false),
        Arc::new(ChatWebhookPost {
            http: resources.http.clone(),
            url_key: "webhookUrl",
            text_key: "content",
        }),
    );
    registry.register(
        NodeDescriptor::new("email_send", "Send Email", NodeCategory::Integration)
            .field("to", true)
            .field("subject", false)
            .field("body", false),
        Arc::new(EmailSend),
    );
    registry.register(
        NodeDescriptor::new("db_query", "Database Query", NodeCategory::Integration)
            .field("query", true),
        Arc::new(DbQuery {
            pool: resources.data_pool.clone(),
        }),
    );
    registry.register(
        NodeDescriptor::new("file_read", "Read File", NodeCategory::Integration)
            .field("path", true),
        Arc::new(FileRead),
    );
    registry.register(
        NodeDescriptor::new("file_write", "Write File", NodeCategory::Integration)
            .field("path", true)
            .field("content", false),
        Arc::new(FileWrite),
    );
    registry.register(
        NodeDescriptor::new("rss_fetch", "Fetch RSS", NodeCategory::Integration)
            .field("url", true)
            .field("limit", false),
        Arc::new(RssFetch {
            http: resources.http.clone(),
        }),
    );
}

/// Generic HTTP call. The response body is sniffed: JSON when it parses,
/// plain text otherwise.
struct HttpRequest {
    http: reqwest::Client,
}

#[async_trait]
impl NodeHandler for HttpRequest {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let url = require_str(config, "url")?;
        let method = opt_str(config, "method").unwrap_or("GET").to_uppercase();

        let mut request = match method.as_str() {
            "GET" => self.http.get(url),
            "POST" => self.http.post(url),
            "PUT" => self.http.put(url),
            "DELETE" => self.http.delete(url),
            "PATCH" => self.http.patch(url),
            other => {
                return Err(EngineError::handler(format!(
                    "unsupported HTTP method: {other}"
                )))
            }
        };

        if let Some(headers) = config.get("headers").and_then(|h| h.as_object()) {
            for (key, value) in headers {
                if let Some(text) = value.as_str() {
                    request = request.header(key, text);
                }
            }
        }
        if let Some(token) = opt_str(config, "bearerToken") {
            request = request.bearer_auth(token);
        }

        if matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
            let body = config
                .get("body")
                .cloned()
                .unwrap_or_else(|| primary_input(inputs));
            match &body {
                Value::Null => {}
                Value::String(text) => {
                    request = request
                        .header("Content-Type", "text/plain")
                        .body(text.clone());
                }
                other => {
                    request = request.json(other);
                }
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::handler(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let text = response
            .text()
            .await
            .map_err(|e| EngineError::handler(format!("failed to read response body: {e}")))?;
        let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        Ok(json!({
            "status": status.as_u16(),
            "headers": headers,
            "data": data,
            "success": status.is_success(),
        }))
    }
}

/// Posts to a Slack- or Discord-style inbound webhook; the payload key
/// differs ("text" vs "content"), the rest is shared.
struct ChatWebhookPost {
    http: reqwest::Client,
    url_key: &'static str,
    text_key: &'static str,
}

#[async_trait]
impl NodeHandler for ChatWebhookPost {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let url = require_str(config, self.url_key)?;
        let text = match opt_str(config, self.text_key) {
            Some(text) => text.to_string(),
            None => value_to_text(&primary_input(inputs)),
        };

        let mut payload = Map::new();
        payload.insert(self.text_key.to_string(), Value::String(text));

        let response = self
            .http
            .post(url)
            .json(&Value::Object(payload))
            .send()
            .await
            .map_err(|e| EngineError::handler(format!("webhook post failed: {e}")))?;

        Ok(json!({
            "status": response.status().as_u16(),
            "ok": response.status().is_success(),
        }))
    }
}

/// Log-only stub; there is no SMTP transport wired up.
struct EmailSend;

#[async_trait]
impl NodeHandler for EmailSend {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let to = require_str(config, "to")?;
        let subject = opt_str(config, "subject").unwrap_or("(no subject)");
        let body = match opt_str(config, "body") {
            Some(body) => body.to_string(),
            None => value_to_text(&primary_input(inputs)),
        };

        tracing::info!("📧 email (stub) to={} subject={} bytes={}", to, subject, body.len());

        Ok(json!({
            "logged": true,
            "delivered": false,
            "to": to,
            "subject": subject,
        }))
    }
}

/// Read-only query gate: anything not beginning with SELECT is rejected
/// before it reaches the database.
struct DbQuery {
    pool: SqlitePool,
}

#[async_trait]
impl NodeHandler for DbQuery {
    async fn run(
        &self,
        config: &Value,
        _inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let query = require_str(config, "query")?;
        if !query.trim_start().to_uppercase().starts_with("SELECT") {
            return Err(EngineError::handler(
                "db_query only accepts SELECT statements",
            ));
        }

        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::handler(format!("database query failed: {e}")))?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let mut record = Map::new();
            for (i, column) in row.columns().iter().enumerate() {
                let value: Option<String> = row.try_get(i).unwrap_or(None);
                let json_value = match value {
                    Some(v) => {
                        if let Ok(n) = v.parse::<i64>() {
                            json!(n)
                        } else if let Ok(n) = v.parse::<f64>() {
                            json!(n)
                        } else {
                            json!(v)
                        }
                    }
                    None => Value::Null,
                };
                record.insert(column.name().to_string(), json_value);
            }
            results.push(Value::Object(record));
        }

        let count = results.len();
        Ok(json!({ "rows": results, "count": count }))
    }
}

struct FileRead;

#[async_trait]
impl NodeHandler for FileRead {
    async fn run(
        &self,
        config: &Value,
        _inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let path = require_str(config, "path")?;
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::handler(format!("could not read '{path}': {e}")))?;
        Ok(json!({ "path": path, "content": content }))
    }
}

/// Writes text to a file, creating parent directories first.
struct FileWrite;

#[async_trait]
impl NodeHandler for FileWrite {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let path = require_str(config, "path")?;
        let content = match opt_str(config, "content") {
            Some(content) => content.to_string(),
            None => value_to_text(&primary_input(inputs)),
        };

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    EngineError::handler(format!("could not create '{}': {e}", parent.display()))
                })?;
            }
        }

        tokio::fs::write(path, content.as_bytes())
            .await
            .map_err(|e| EngineError::handler(format!("could not write '{path}': {e}")))?;

        Ok(json!({ "path": path, "bytesWritten": content.len() }))
    }
}

/// Minimal RSS reader: fetches the feed and extracts `<item>` blocks with
/// regexes. Good enough for simple feeds; not an XML parser.
struct RssFetch {
    http: reqwest::Client,
}

#[async_trait]
impl NodeHandler for RssFetch {
    async fn run(
        &self,
        config: &Value,
        _inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let url = require_str(config, "url")?;
        let limit = opt_u64(config, "limit").unwrap_or(DEFAULT_RSS_LIMIT) as usize;

        let body = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::handler(format!("feed fetch failed: {e}")))?
            .text()
            .await
            .map_err(|e| EngineError::handler(format!("feed body unreadable: {e}")))?;

        let items = parse_feed_items(&body, limit)?;
        let count = items.len();
        Ok(json!({ "url": url, "items": items, "count": count }))
    }
}

fn parse_feed_items(body: &str, limit: usize) -> Result<Vec<Value>, EngineError> {
    let item_re = Regex::new(r"(?s)<item[^>]*>(.*?)</item>")
        .map_err(|e| EngineError::handler(format!("feed parser setup failed: {e}")))?;

    let mut items = Vec::new();
    for captures in item_re.captures_iter(body).take(limit) {
        let block = &captures[1];
        items.push(json!({
            "title": feed_field(block, "title"),
            "link": feed_field(block, "link"),
            "description": feed_field(block, "description"),
            "pubDate": feed_field(block, "pubDate"),
        }));
    }
    Ok(items)
}

fn feed_field(block: &str, tag: &str) -> Value {
    let pattern = format!(r"(?s)<{tag}[^>]*>(.*?)</{tag}>");
    let Ok(re) = Regex::new(&pattern) else {
        return Value::Null;
    };

    re.captures(block)
        .map(|caps| {
            let raw = caps[1].trim();
            let text = raw
                .strip_prefix("<![CDATA[")
                .and_then(|rest| rest.strip_suffix("]]>"))
                .unwrap_or(raw);
            Value::String(text.trim().to_string())
        })
        .unwrap_or(Value::Null)
}
