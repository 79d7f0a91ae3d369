//! Webhook router: (method, path) → workflow dispatch.
//!
//! Keeps the inbound-trigger index and shapes responses. The HTTP layer
//! forwards every request under the webhook prefix here; the router decides
//! whether a workflow is bound to it and invokes the dispatch callback
//! supplied at construction (normally "run this workflow").

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Dispatch callback invoked for every matched request.
pub type WebhookCallback = Arc<
    dyn Fn(WebhookRequest) -> Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>
        + Send
        + Sync,
>;

/// A binding of (HTTP method, path) to a workflow id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRegistration {
    pub workflow_id: String,
    pub path: String,
    pub method: String,
    pub created_at: DateTime<Utc>,
}

/// Normalized request envelope handed to the dispatch callback.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub workflow_id: String,
    pub path: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

/// Response produced for a matched webhook call.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Value,
}

/// The (method, path) → workflow index plus the dispatch callback.
pub struct WebhookRouter {
    routes: RwLock<HashMap<(String, String), String>>,
    registrations: RwLock<HashMap<String, WebhookRegistration>>,
    callback: WebhookCallback,
}

impl WebhookRouter {
    pub fn new(callback: WebhookCallback) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            registrations: RwLock::new(HashMap::new()),
            callback,
        }
    }

    /// Bind a workflow to a (method, path) pair.
    ///
    /// Path and method are normalized (leading slash, upper-case). A prior
    /// registration for the same workflow id is removed first, so each
    /// workflow holds at most one route and each route maps to at most one
    /// workflow.
    pub async fn register(
        &self,
        workflow_id: &str,
        path: &str,
        method: &str,
    ) -> WebhookRegistration {
        let registration = WebhookRegistration {
            workflow_id: workflow_id.to_string(),
            path: normalize_path(path),
            method: method.to_uppercase(),
            created_at: Utc::now(),
        };

        let mut routes = self.routes.write().await;
        let mut registrations = self.registrations.write().await;

        // free the old key before claiming the new one
        if let Some(previous) = registrations.remove(workflow_id) {
            routes.remove(&(previous.method.clone(), previous.path.clone()));
        }

        routes.insert(
            (registration.method.clone(), registration.path.clone()),
            workflow_id.to_string(),
        );
        registrations.insert(workflow_id.to_string(), registration.clone());

        tracing::info!(
            "🔗 webhook registered: {} {} -> workflow '{}'",
            registration.method,
            registration.path,
            workflow_id
        );
        registration
    }

    /// Remove a workflow's registration. Returns whether one existed.
    pub async fn deregister(&self, workflow_id: &str) -> bool {
        let mut routes = self.routes.write().await;
        let mut registrations = self.registrations.write().await;

        match registrations.remove(workflow_id) {
            Some(previous) => {
                routes.remove(&(previous.method, previous.path));
                true
            }
            None => false,
        }
    }

    pub async fn registrations(&self) -> Vec<WebhookRegistration> {
        self.registrations.read().await.values().cloned().collect()
    }

    /// Dispatch an inbound request.
    ///
    /// Returns None when no registration matches the (method, path) pair.
    /// Otherwise the callback runs and its result is shaped: an object
    /// carrying `statusCode` is used verbatim as status + `body`; anything
    /// else is wrapped as `{success, workflowId, result}`. A callback error
    /// becomes a 500 with the error message.
    pub async fn handle(
        &self,
        path: &str,
        method: &str,
        headers: HashMap<String, String>,
        body: Value,
    ) -> Option<WebhookResponse> {
        let key = (method.to_uppercase(), normalize_path(path));
        let workflow_id = self.routes.read().await.get(&key).cloned()?;

        let request = WebhookRequest {
            workflow_id: workflow_id.clone(),
            path: key.1,
            method: key.0,
            headers,
            body,
        };

        tracing::info!(
            "📥 webhook {} {} -> workflow '{}'",
            request.method,
            request.path,
            workflow_id
        );

        let response = match (self.callback)(request).await {
            Ok(result) => shape_response(&workflow_id, result),
            Err(e) => WebhookResponse {
                status: 500,
                body: json!({ "error": format!("{e:#}"), "workflowId": workflow_id }),
            },
        };

        Some(response)
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn shape_response(workflow_id: &str, result: Value) -> WebhookResponse {
    if let Some(status) = result.get("statusCode").and_then(|s| s.as_u64()) {
        return WebhookResponse {
            status: status as u16,
            body: result.get("body").cloned().unwrap_or(Value::Null),
        };
    }

    WebhookResponse {
        status: 200,
        body: json!({
            "success": true,
            "workflowId": workflow_id,
            "result": result,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    fn recording_router() -> (Arc<Mutex<Vec<WebhookRequest>>>, WebhookRouter) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_cb = Arc::clone(&seen);
        let callback: WebhookCallback = Arc::new(move |request| {
            let seen = Arc::clone(&seen_in_cb);
            Box::pin(async move {
                let body = request.body.clone();
                seen.lock().await.push(request);
                Ok(json!({ "echo": body }))
            })
        });
        (seen, WebhookRouter::new(callback))
    }

    #[tokio::test]
    async fn registration_normalizes_and_dispatches() {
        let (seen, router) = recording_router();

        let registration = router.register("wf-2", "foo", "post").await;
        assert_eq!(registration.path, "/foo");
        assert_eq!(registration.method, "POST");

        let response = router
            .handle("/foo", "POST", HashMap::new(), json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body["workflowId"], json!("wf-2"));
        assert_eq!(response.body["result"]["echo"], json!({"a": 1}));

        let requests = seen.lock().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].workflow_id, "wf-2");
        assert_eq!(requests[0].body, json!({"a": 1}));
    }

    #[tokio::test]
    async fn unmatched_requests_return_none() {
        let (_, router) = recording_router();
        router.register("wf-2", "/foo", "POST").await;

        assert!(router
            .handle("/bar", "POST", HashMap::new(), json!({}))
            .await
            .is_none());
        assert!(router
            .handle("/foo", "GET", HashMap::new(), json!({}))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn reregistration_frees_the_old_route() {
        let (_, router) = recording_router();

        router.register("wf-2", "/old", "POST").await;
        router.register("wf-2", "/new", "POST").await;

        assert!(router
            .handle("/old", "POST", HashMap::new(), json!({}))
            .await
            .is_none());
        assert!(router
            .handle("/new", "POST", HashMap::new(), json!({}))
            .await
            .is_some());
        assert_eq!(router.registrations().await.len(), 1);
    }

    #[tokio::test]
    async fn status_code_results_pass_through_verbatim() {
        let callback: WebhookCallback = Arc::new(|_request| {
            Box::pin(async move {
                Ok(json!({ "statusCode": 202, "body": { "queued": true } }))
            })
        });
        let router = WebhookRouter::new(callback);
        router.register("wf-3", "/enqueue", "POST").await;

        let response = router
            .handle("/enqueue", "POST", HashMap::new(), json!({}))
            .await
            .unwrap();
        assert_eq!(response.status, 202);
        assert_eq!(response.body, json!({ "queued": true }));
    }

    #[tokio::test]
    async fn callback_errors_become_500_without_deregistering() {
        let callback: WebhookCallback =
            Arc::new(|_request| Box::pin(async move { anyhow::bail!("engine exploded") }));
        let router = WebhookRouter::new(callback);
        router.register("wf-4", "/boom", "POST").await;

        let response = router
            .handle("/boom", "POST", HashMap::new(), json!({}))
            .await
            .unwrap();
        assert_eq!(response.status, 500);
        assert!(response.body["error"]
            .as_str()
            .unwrap()
            .contains("engine exploded"));

        // registration survives the failure
        assert!(router
            .handle("/boom", "POST", HashMap::new(), json!({}))
            .await
            .is_some());
    }
}
