//! Serving deployed bundles: the client script and a minimal HTML shell.

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};

use crate::state::AppState;

/// `GET /{slug}/client.js`
pub async fn client_js(Path(slug): Path<String>, State(state): State<AppState>) -> Response {
    match state.registry.client_source(&slug).await {
        Ok(source) => (
            [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
            source,
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, format!("unknown slug: {slug}")).into_response(),
    }
}

/// `GET /{slug}/` — a minimal shell that loads the bundled client.
pub async fn shell(Path(slug): Path<String>, State(state): State<AppState>) -> Response {
    if !state.registry.has_slot(&slug) {
        return (StatusCode::NOT_FOUND, format!("unknown slug: {slug}")).into_response();
    }
    Html(format!(
        r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{slug}</title>
</head>
<body>
  <div id="app"></div>
  <script src="/{slug}/client.js"></script>
</body>
</html>
"#
    ))
    .into_response()
}
