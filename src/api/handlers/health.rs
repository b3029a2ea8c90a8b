//! Liveness endpoint with build information.

use axum::{
    http::HeaderMap,
    response::{IntoResponse, Json},
};
use serde_json::json;

use crate::api::GIT_COMMIT_HASH;

pub(crate) async fn health() -> impl IntoResponse {
    let body = Json(json!({
        "status": "ok",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "build": GIT_COMMIT_HASH,
    }));

    let short_hash = if GIT_COMMIT_HASH.len() > 7 {
        &GIT_COMMIT_HASH[0..7]
    } else {
        GIT_COMMIT_HASH
    };

    let mut headers = HeaderMap::new();
    let app = format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_hash
    );
    if let Ok(value) = app.parse() {
        headers.insert("X-App", value);
    }

    (headers, body)
}
