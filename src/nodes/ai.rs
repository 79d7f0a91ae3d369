//! AI node handlers.
//!
//! Every handler here delegates to the injected `CompletionClient` and
//! shapes the reply. Handlers that ask the model for constrained JSON
//! (classify, extract, sentiment) parse defensively and fall back to a
//! well-formed low-confidence answer instead of failing the node.

use super::{
    opt_f64, opt_u64, primary_input, require_str, value_to_text, NodeCategory, NodeDescriptor,
    NodeHandler, NodeTypeRegistry,
};
use crate::ai::{ChatMessage, CompletionClient, CompletionOptions};
use crate::error::EngineError;
use crate::nodes::HandlerResources;
use crate::workflow::types::ExecutionContext;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn register(registry: &mut NodeTypeRegistry, resources: &HandlerResources) {
    let client = Arc::clone(&resources.completion);

    registry.register(
        NodeDescriptor::new("ai_complete", "AI Completion", NodeCategory::Ai)
            .field("prompt", false)
            .field("temperature", false)
            .field("maxTokens", false),
        Arc::new(Complete {
            client: Arc::clone(&client),
        }),
    );
    registry.register(
        NodeDescriptor::new("ai_chat", "AI Chat", NodeCategory::Ai).field("system", false),
        Arc::new(Chat {
            client: Arc::clone(&client),
        }),
    );
    registry.register(
        NodeDescriptor::new("ai_summarize", "Summarize", NodeCategory::Ai).field("style", false),
        Arc::new(Summarize {
            client: Arc::clone(&client),
        }),
    );
    registry.register(
        NodeDescriptor::new("ai_classify", "Classify", NodeCategory::Ai)
            .field("categories", true),
        Arc::new(Classify {
            client: Arc::clone(&client),
        }),
    );
    registry.register(
        NodeDescriptor::new("ai_extract", "Extract Fields", NodeCategory::Ai)
            .field("fields", true),
        Arc::new(Extract {
            client: Arc::clone(&client),
        }),
    );
    registry.register(
        NodeDescriptor::new("ai_translate", "Translate", NodeCategory::Ai)
            .field("targetLanguage", true),
        Arc::new(Translate {
            client: Arc::clone(&client),
        }),
    );
    registry.register(
        NodeDescriptor::new("ai_sentiment", "Sentiment", NodeCategory::Ai),
        Arc::new(Sentiment {
            client: Arc::clone(&client),
        }),
    );
    registry.register(
        NodeDescriptor::new("ai_embed", "Embedding", NodeCategory::Ai),
        Arc::new(Embed { client }),
    );
}

fn options(config: &Value) -> CompletionOptions {
    CompletionOptions {
        temperature: opt_f64(config, "temperature"),
        max_tokens: opt_u64(config, "maxTokens").map(|t| t as u32),
    }
}

fn input_text(inputs: &Value) -> String {
    value_to_text(&primary_input(inputs))
}

/// Parse a reply the model was asked to keep as bare JSON. Models routinely
/// wrap it in a code fence anyway; strip one before parsing.
fn parse_json_reply(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).ok()
}

/// Single-shot completion over a configured prompt, the input data as
/// context.
struct Complete {
    client: Arc<dyn CompletionClient>,
}

#[async_trait]
impl NodeHandler for Complete {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let data = input_text(inputs);
        let content = match super::opt_str(config, "prompt") {
            Some(prompt) if !data.is_empty() => format!("{prompt}\n\n{data}"),
            Some(prompt) => prompt.to_string(),
            None => data,
        };
        if content.is_empty() {
            return Err(EngineError::handler("no prompt configured and no input data"));
        }

        let reply = self
            .client
            .chat(&[ChatMessage::user(content)], &options(config))
            .await?;

        Ok(json!({ "text": reply.content, "usage": reply.usage }))
    }
}

/// Multi-turn chat: expects the input to carry a `messages` array.
struct Chat {
    client: Arc<dyn CompletionClient>,
}

#[async_trait]
impl NodeHandler for Chat {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let data = primary_input(inputs);
        let raw = data
            .get("messages")
            .cloned()
            .unwrap_or_else(|| json!([{ "role": "user", "content": value_to_text(&data) }]));

        let mut messages: Vec<ChatMessage> = serde_json::from_value(raw)
            .map_err(|e| EngineError::handler(format!("malformed messages array: {e}")))?;

        if let Some(system) = super::opt_str(config, "system") {
            messages.insert(0, ChatMessage::system(system));
        }

        let reply = self.client.chat(&messages, &options(config)).await?;
        Ok(json!({ "reply": reply.content, "usage": reply.usage }))
    }
}

struct Summarize {
    client: Arc<dyn CompletionClient>,
}

#[async_trait]
impl NodeHandler for Summarize {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let style = super::opt_str(config, "style").unwrap_or("concise");
        let system = format!("Summarize the user's text. Style: {style}.");
        let reply = self
            .client
            .chat(
                &[ChatMessage::system(system), ChatMessage::user(input_text(inputs))],
                &options(config),
            )
            .await?;
        Ok(json!({ "summary": reply.content }))
    }
}

/// Classifies the input into one of the configured categories. Parse failure
/// degrades to the first category with confidence 0.
struct Classify {
    client: Arc<dyn CompletionClient>,
}

#[async_trait]
impl NodeHandler for Classify {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let categories: Vec<String> = config
            .get("categories")
            .and_then(|c| c.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .filter(|c: &Vec<String>| !c.is_empty())
            .ok_or_else(|| EngineError::handler("missing required config 'categories'"))?;

        let system = format!(
            "Classify the user's text into exactly one of: {}. Reply with bare JSON \
             {{\"category\": \"...\", \"confidence\": 0.0}} and nothing else.",
            categories.join(", ")
        );
        let reply = self
            .client
            .chat(
                &[ChatMessage::system(system), ChatMessage::user(input_text(inputs))],
                &options(config),
            )
            .await?;

        let parsed = parse_json_reply(&reply.content)
            .filter(|v| v.get("category").map(|c| c.is_string()).unwrap_or(false));

        Ok(match parsed {
            Some(v) => v,
            None => json!({ "category": categories[0], "confidence": 0.0 }),
        })
    }
}

/// Structured field extraction. Parse failure returns `{raw: <text>}`.
struct Extract {
    client: Arc<dyn CompletionClient>,
}

#[async_trait]
impl NodeHandler for Extract {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let fields = config
            .get("fields")
            .and_then(|f| f.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .filter(|f| !f.is_empty())
            .ok_or_else(|| EngineError::handler("missing required config 'fields'"))?;

        let system = format!(
            "Extract these fields from the user's text: {fields}. Reply with a bare JSON \
             object keyed by field name and nothing else."
        );
        let reply = self
            .client
            .chat(
                &[ChatMessage::system(system), ChatMessage::user(input_text(inputs))],
                &options(config),
            )
            .await?;

        Ok(parse_json_reply(&reply.content).unwrap_or_else(|| json!({ "raw": reply.content })))
    }
}

struct Translate {
    client: Arc<dyn CompletionClient>,
}

#[async_trait]
impl NodeHandler for Translate {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let language = require_str(config, "targetLanguage")?;
        let system = format!("Translate the user's text to {language}. Reply with the translation only.");
        let reply = self
            .client
            .chat(
                &[ChatMessage::system(system), ChatMessage::user(input_text(inputs))],
                &options(config),
            )
            .await?;
        Ok(json!({ "translation": reply.content, "targetLanguage": language }))
    }
}

/// Sentiment scoring. Parse failure degrades to neutral/0.
struct Sentiment {
    client: Arc<dyn CompletionClient>,
}

#[async_trait]
impl NodeHandler for Sentiment {
    async fn run(
        &self,
        config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let system = "Rate the sentiment of the user's text. Reply with bare JSON \
                      {\"sentiment\": \"positive|neutral|negative\", \"score\": -1.0} and nothing else.";
        let reply = self
            .client
            .chat(
                &[ChatMessage::system(system), ChatMessage::user(input_text(inputs))],
                &options(config),
            )
            .await?;

        let parsed = parse_json_reply(&reply.content)
            .filter(|v| v.get("sentiment").map(|s| s.is_string()).unwrap_or(false));

        Ok(match parsed {
            Some(v) => v,
            None => json!({ "sentiment": "neutral", "score": 0.0 }),
        })
    }
}

struct Embed {
    client: Arc<dyn CompletionClient>,
}

#[async_trait]
impl NodeHandler for Embed {
    async fn run(
        &self,
        _config: &Value,
        inputs: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let text = input_text(inputs);
        if text.is_empty() {
            return Err(EngineError::handler("no input text to embed"));
        }
        let vector = self.client.embed(&text).await?;
        Ok(json!({ "dimensions": vector.len(), "embedding": vector }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ai::{Completion, Usage};

    /// Completion client that replies from a fixed script.
    pub(crate) struct ScriptedClient {
        pub reply: String,
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _options: &CompletionOptions,
        ) -> Result<Completion, EngineError> {
            Ok(Completion {
                content: self.reply.clone(),
                usage: Usage::default(),
            })
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EngineError> {
            Ok(vec![0.25, 0.5, 0.75])
        }
    }

    fn client(reply: &str) -> Arc<dyn CompletionClient> {
        Arc::new(ScriptedClient {
            reply: reply.to_string(),
        })
    }

    #[tokio::test]
    async fn classify_parses_constrained_reply() {
        let ctx = ExecutionContext::new();
        let node = Classify {
            client: client(r#"{"category": "bug", "confidence": 0.9}"#),
        };
        let out = node
            .run(
                &json!({"categories": ["bug", "feature"]}),
                &json!({"n1": "it crashes"}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out["category"], json!("bug"));
    }

    #[tokio::test]
    async fn classify_falls_back_on_garbage_reply() {
        let ctx = ExecutionContext::new();
        let node = Classify {
            client: client("definitely a bug, trust me"),
        };
        let out = node
            .run(
                &json!({"categories": ["bug", "feature"]}),
                &json!({"n1": "it crashes"}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out, json!({"category": "bug", "confidence": 0.0}));
    }

    #[tokio::test]
    async fn extract_falls_back_to_raw() {
        let ctx = ExecutionContext::new();
        let node = Extract {
            client: client("name: Ada"),
        };
        let out = node
            .run(&json!({"fields": ["name"]}), &json!({"n1": "Ada wrote it"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!({"raw": "name: Ada"}));
    }

    #[tokio::test]
    async fn sentiment_falls_back_to_neutral() {
        let ctx = ExecutionContext::new();
        let node = Sentiment {
            client: client("pretty positive I guess"),
        };
        let out = node.run(&json!({}), &json!({"n1": "love it"}), &ctx).await.unwrap();
        assert_eq!(out, json!({"sentiment": "neutral", "score": 0.0}));
    }

    #[tokio::test]
    async fn fenced_json_reply_is_parsed() {
        let ctx = ExecutionContext::new();
        let node = Extract {
            client: client("```json\n{\"name\": \"Ada\"}\n```"),
        };
        let out = node
            .run(&json!({"fields": ["name"]}), &json!({"n1": "Ada wrote it"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!({"name": "Ada"}));
    }
}
