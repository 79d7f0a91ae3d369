//! Server setup and initialization.
//!
//! Wires together storage, the node-type registry, the execution engine, the
//! scheduler, and the webhook router, then exposes the HTTP surface.

use crate::{
    ai::HttpCompletionClient,
    api::{
        webhook_routes, workflow_routes,
        workflows::{activate_workflow, run_and_record, AppState},
    },
    config::Config,
    nodes::{builtin_registry, HandlerResources},
    runtime::{webhook::WebhookCallback, NodeExecutor, Scheduler, WebhookRouter, WorkflowEngine},
    workflow::{registry::WorkflowRegistry, storage::WorkflowStore},
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Build the full application: databases, registries, engine, triggers,
/// and the axum router.
pub async fn create_app(config: Config) -> Result<Router> {
    let engine_pool = open_database(&config.database.path).await?;
    let data_pool = open_database(&config.database.data_path).await?;

    let store = WorkflowStore::new(engine_pool);
    store.init_schema().await?;

    let http = reqwest::Client::new();
    let completion = Arc::new(HttpCompletionClient::new(
        http.clone(),
        &config.completion.base_url,
        &config.completion.api_key,
        &config.completion.model,
    ));

    let resources = HandlerResources {
        completion,
        data_pool,
        http,
    };
    let node_registry = Arc::new(builtin_registry(&resources));

    let executor = Arc::new(NodeExecutor::new(Arc::clone(&node_registry)));
    let engine = Arc::new(WorkflowEngine::new(executor));
    let scheduler = Arc::new(Scheduler::new());

    let registry = Arc::new(WorkflowRegistry::new(store.clone()));
    registry.init_from_store().await?;

    // single dispatch callback shared by every webhook registration
    let webhooks = {
        let engine = Arc::clone(&engine);
        let registry = Arc::clone(&registry);
        let store = store.clone();
        let callback: WebhookCallback = Arc::new(move |request| {
            let engine = Arc::clone(&engine);
            let registry = Arc::clone(&registry);
            let store = store.clone();
            Box::pin(async move {
                let result = run_and_record(
                    &engine,
                    &registry,
                    &store,
                    &request.workflow_id,
                    request.body,
                )
                .await?;
                Ok(serde_json::to_value(&result)?)
            })
        });
        Arc::new(WebhookRouter::new(callback))
    };

    let state = AppState {
        store,
        registry: Arc::clone(&registry),
        scheduler,
        webhooks,
        engine,
        node_registry,
    };

    // rehydrate schedule and webhook bindings from the stored definitions
    for def in registry.all() {
        if let Err(e) = activate_workflow(&state, &def).await {
            tracing::error!("could not activate workflow '{}': {:#}", def.id, e);
        }
    }

    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(workflow_routes().with_state(state.clone()))
        .merge(webhook_routes().with_state(state));

    tracing::info!("✅ application initialized");
    Ok(app)
}

async fn open_database(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    Ok(SqlitePool::connect_with(options).await?)
}

/// Start the HTTP server with the given configuration.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("starting pipewright...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
