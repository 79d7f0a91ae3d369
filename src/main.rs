//! Server entry point.
//!
//! Starts the engine with env-derived configuration:
//! - workflow management API under /api/workflows
//! - inbound webhooks under /hooks
//! - health check at /healthz

use pipewright::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    start_server(config).await?;
    Ok(())
}
