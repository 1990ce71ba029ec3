//! Configuration endpoints, thin wrappers over the config cache

use crate::{
    app::AppState,
    error::{ok, ok_empty, ApiError, ApiResult, Envelope},
};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use sqlfan_shared::models::ConfigEntry;

pub async fn get_one(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<Envelope<ConfigEntry>>> {
    let value = state
        .configs
        .get(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("config {} not found", key)))?;
    Ok(ok(ConfigEntry {
        c_key: key,
        c_value: value,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SetRequest {
    pub c_key: String,
    pub c_value: String,
}

pub async fn set_one(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> ApiResult<Json<Envelope<()>>> {
    if req.c_key.trim().is_empty() {
        return Err(ApiError::BadRequest("c_key is required".to_string()));
    }
    state.configs.set(&req.c_key, &req.c_value).await?;
    Ok(ok_empty())
}

#[derive(Debug, Deserialize)]
pub struct BatchGetRequest {
    pub keys: Vec<String>,
}

pub async fn batch_get(
    State(state): State<AppState>,
    Json(req): Json<BatchGetRequest>,
) -> ApiResult<Json<Envelope<Vec<ConfigEntry>>>> {
    let entries = state.configs.batch_get(&req.keys).await?;
    Ok(ok(entries))
}

pub async fn batch_set(
    State(state): State<AppState>,
    Json(entries): Json<Vec<ConfigEntry>>,
) -> ApiResult<Json<Envelope<()>>> {
    if entries.iter().any(|e| e.c_key.trim().is_empty()) {
        return Err(ApiError::BadRequest("c_key is required".to_string()));
    }
    state.configs.batch_set(&entries).await?;
    Ok(ok_empty())
}
