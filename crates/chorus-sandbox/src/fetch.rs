//! Host side of the proxied `fetch`.
//!
//! The isolate never holds a network capability. Its `ctx.fetch` is a thin
//! JavaScript shim that serializes the request to JSON, calls the single
//! host function registered on the context, and rehydrates the response.
//! The host performs the request with `reqwest` and aborts it when the
//! call's cancel token fires, so cancelling a tool call cancels its
//! in-flight network I/O too.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Request descriptor produced by the JS shim.
#[derive(Debug, Deserialize)]
struct FetchRequest {
    url: String,
    #[serde(default)]
    init: Option<FetchInit>,
}

/// Subset of the WHATWG `RequestInit` the shim supports.
#[derive(Debug, Default, Deserialize)]
struct FetchInit {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: Option<HashMap<String, String>>,
    #[serde(default)]
    body: Option<String>,
}

/// Response descriptor consumed by the JS shim. `error` is set instead of
/// the other fields when the request failed or was cancelled.
#[derive(Debug, Default, Serialize)]
struct FetchResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    status: u16,
    headers: HashMap<String, String>,
    body: String,
}

impl FetchResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Perform one proxied fetch. Always returns a JSON string — transport
/// failures are encoded in the `error` field and re-thrown by the shim.
pub(crate) async fn perform(
    client: &reqwest::Client,
    request_json: &str,
    cancel: &CancellationToken,
) -> String {
    let response = match serde_json::from_str::<FetchRequest>(request_json) {
        Ok(request) => dispatch(client, request, cancel).await,
        Err(e) => FetchResponse::failure(format!("invalid fetch request: {e}")),
    };
    // FetchResponse serialization cannot fail: all fields are strings/maps.
    serde_json::to_string(&response).unwrap_or_else(|_| r#"{"error":"fetch failed"}"#.to_string())
}

async fn dispatch(
    client: &reqwest::Client,
    request: FetchRequest,
    cancel: &CancellationToken,
) -> FetchResponse {
    let init = request.init.unwrap_or_default();
    let method = init.method.as_deref().unwrap_or("GET").to_ascii_uppercase();
    let method = match method.parse::<reqwest::Method>() {
        Ok(m) => m,
        Err(_) => return FetchResponse::failure(format!("invalid method: {method}")),
    };

    let mut builder = client.request(method, &request.url);
    if let Some(headers) = init.headers {
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
    }
    if let Some(body) = init.body {
        builder = builder.body(body);
    }

    let outcome = tokio::select! {
        result = builder.send() => result,
        () = cancel.cancelled() => return FetchResponse::failure("fetch cancelled"),
    };

    let response = match outcome {
        Ok(r) => r,
        Err(e) => return FetchResponse::failure(format!("fetch failed: {e}")),
    };

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let body = tokio::select! {
        result = response.text() => result,
        () = cancel.cancelled() => return FetchResponse::failure("fetch cancelled"),
    };

    match body {
        Ok(body) => FetchResponse {
            error: None,
            status,
            headers,
            body,
        },
        Err(e) => FetchResponse::failure(format!("failed to read response body: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_request_json_is_an_error_value() {
        let client = reqwest::Client::new();
        let out = perform(&client, "not json", &CancellationToken::new()).await;
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(
            value["error"]
                .as_str()
                .unwrap()
                .starts_with("invalid fetch request")
        );
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let client = reqwest::Client::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = perform(
            &client,
            r#"{"url":"http://192.0.2.1/never"}"#,
            &cancel,
        )
        .await;
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["error"], "fetch cancelled");
    }

    #[tokio::test]
    async fn invalid_method_is_rejected() {
        let client = reqwest::Client::new();
        let out = perform(
            &client,
            r#"{"url":"http://example.com","init":{"method":"NO SPACES"}}"#,
            &CancellationToken::new(),
        )
        .await;
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(value["error"].as_str().unwrap().starts_with("invalid method"));
    }
}
