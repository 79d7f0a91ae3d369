//! HTTP API layer: workflow management endpoints and the inbound webhook
//! surface.

pub mod webhooks;
pub mod workflows;

pub use webhooks::webhook_routes;
pub use workflows::{workflow_routes, AppState};
