//! The small informational endpoints and the fallback handler.

use std::sync::Arc;

use axum::{
    Extension, Json,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use llm::ProxyState;
use serde_json::json;

/// Static facts reported on `GET /`.
pub(crate) struct AppInfo {
    pub(crate) version: String,
    pub(crate) config_digest: String,
}

/// `GET /`: name, version, and the digest of the loaded config file.
pub(crate) async fn root(Extension(info): Extension<Arc<AppInfo>>) -> Json<serde_json::Value> {
    Json(json!({
        "name": "patchbay",
        "version": info.version,
        "config_digest": info.config_digest,
    }))
}

/// `GET /health`: liveness.
pub(crate) async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /test-connection`: round-trip a trivial completion through the
/// engine and report which backend answered.
pub(crate) async fn test_connection(Extension(state): Extension<Arc<ProxyState>>) -> Response {
    match llm::test_connection(&state).await {
        Ok((backend, latency_ms)) => Json(json!({
            "ok": true,
            "backend": backend,
            "latency_ms": latency_ms,
        }))
        .into_response(),
        Err(error) => {
            log::warn!("connection test failed: {error}");
            let status = error.status_code();
            (status, Json(json!({ "ok": false, "error": error.client_message() }))).into_response()
        }
    }
}

/// Unmatched routes: 204 for CORS preflight, JSON 404 for everything
/// else.
pub(crate) async fn fallback(method: Method, uri: Uri) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }

    log::debug!("no route for {method} {uri}");
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not Found" }))).into_response()
}
