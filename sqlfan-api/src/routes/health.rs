//! Health check endpoint
//!
//! ```text
//! GET /health
//! ```
//!
//! Verifies the server is up and the local store answers.

use crate::{
    app::AppState,
    error::{ok, ApiResult, Envelope},
};
use axum::{extract::State, Json};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store: String,
}

/// Health check handler.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<Envelope<HealthResponse>>> {
    let store = match sqlx::query("SELECT 1").fetch_one(&state.db).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    Ok(ok(HealthResponse {
        status: if store == "connected" {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: store.to_string(),
    }))
}
