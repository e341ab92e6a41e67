use axum::{
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::GIT_COMMIT_HASH;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    name: String,
    version: String,
    build: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = Health, content_type = "application/json"),
    ),
    tag = "health"
)]
// axum handler for health
pub async fn health() -> impl IntoResponse {
    let body = Json(Health {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: GIT_COMMIT_HASH.to_string(),
    });

    let short_hash = GIT_COMMIT_HASH.get(0..7).unwrap_or_default();

    let mut headers = HeaderMap::new();
    if let Ok(app) = HeaderValue::from_str(&format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_hash
    )) {
        headers.insert("X-App", app);
    }

    (headers, body)
}
