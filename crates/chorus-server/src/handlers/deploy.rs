//! `POST /deploy` — upload an agent bundle.

use std::collections::HashMap;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::info;

use chorus_registry::{DeployUpload, RegistryError};

use crate::state::AppState;

/// Deploy request body.
#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    pub slug: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Bundled worker source (registers the agent).
    pub worker: String,
    /// Bundled browser client source.
    #[serde(default)]
    pub client: String,
}

/// `GET /deploys` — list the exposed slugs.
pub async fn list(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "slugs": state.registry.slugs() }))
}

/// `POST /deploy`
pub async fn deploy(
    State(state): State<AppState>,
    Json(request): Json<DeployRequest>,
) -> Response {
    info!(slug = %request.slug, "deploy requested");
    let upload = DeployUpload {
        slug: request.slug,
        env: request.env,
        worker_source: request.worker,
        client_source: request.client,
    };
    match state.registry.deploy(upload).await {
        Ok(()) => Json(serde_json::json!({"ok": true})).into_response(),
        Err(e @ RegistryError::InvalidDeploy(_)) => {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
