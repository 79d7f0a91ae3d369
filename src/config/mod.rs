//! Configuration: server binding, database paths, completion endpoint.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub completion: CompletionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Engine database: workflow definitions and execution history
    pub path: String,
    /// Data database backing the db_query node
    pub data_path: String,
}

/// OpenAI-compatible completion endpoint used by the AI nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for Config {
    /// Defaults with env-var overrides for container deployment.
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("PIPEWRIGHT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("PIPEWRIGHT_PORT")
                    .unwrap_or_else(|_| "3100".to_string())
                    .parse()
                    .unwrap_or(3100),
            },
            database: DatabaseConfig {
                path: std::env::var("PIPEWRIGHT_DB")
                    .unwrap_or_else(|_| "data/pipewright.db".to_string()),
                data_path: std::env::var("PIPEWRIGHT_DATA_DB")
                    .unwrap_or_else(|_| "data/datastore.db".to_string()),
            },
            completion: CompletionConfig {
                base_url: std::env::var("PIPEWRIGHT_AI_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                api_key: std::env::var("PIPEWRIGHT_AI_KEY").unwrap_or_default(),
                model: std::env::var("PIPEWRIGHT_AI_MODEL")
                    .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            },
        }
    }
}
