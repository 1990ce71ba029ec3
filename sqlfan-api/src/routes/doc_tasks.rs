//! Doc-task endpoints: CRUD plus a manual run trigger
//!
//! Doc tasks feed the interval scheduler's doc-job family; the run endpoint
//! fires the same pluggable handler the scheduler uses. Document generation
//! itself lives behind that handler.

use crate::{
    app::AppState,
    error::{ok, ok_empty, ApiError, ApiResult, Envelope},
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlfan_shared::models::{doc_task::UpsertDocTask, DocTask, Instance, Pagination};
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub task_name: Option<String>,
    #[serde(default, deserialize_with = "sqlfan_shared::models::common::de::flexible_opt_i64")]
    pub instance_id: Option<i64>,
    #[serde(flatten)]
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub total: i64,
    pub items: Vec<DocTask>,
}

async fn validate(state: &AppState, req: &UpsertDocTask) -> Result<(), ApiError> {
    if req.task_name.trim().is_empty() {
        return Err(ApiError::BadRequest("task_name is required".to_string()));
    }
    if req.database_name.trim().is_empty() {
        return Err(ApiError::BadRequest("database_name is required".to_string()));
    }
    if Instance::find_by_id(&state.db, req.instance_id).await?.is_none() {
        return Err(ApiError::BadRequest(format!(
            "instance {} not found",
            req.instance_id
        )));
    }
    Ok(())
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<UpsertDocTask>,
) -> ApiResult<Json<Envelope<DocTask>>> {
    validate(&state, &req).await?;
    let task = DocTask::create(&state.db, &req).await?;
    Ok(ok(task))
}

pub async fn list(
    State(state): State<AppState>,
    Query(mut query): Query<ListQuery>,
) -> ApiResult<Json<Envelope<ListResponse>>> {
    query.pagination.normalize();
    let (total, items) = DocTask::list(
        &state.db,
        query.task_name.as_deref(),
        query.instance_id,
        query.pagination.limit(),
        query.pagination.offset(),
    )
    .await?;
    Ok(ok(ListResponse { total, items }))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Envelope<DocTask>>> {
    let task = DocTask::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("doc task {} not found", id)))?;
    Ok(ok(task))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpsertDocTask>,
) -> ApiResult<Json<Envelope<DocTask>>> {
    validate(&state, &req).await?;
    let task = DocTask::update(&state.db, id, &req)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("doc task {} not found", id)))?;
    Ok(ok(task))
}

pub async fn delete_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Envelope<()>>> {
    if !DocTask::delete(&state.db, id).await? {
        return Err(ApiError::NotFound(format!("doc task {} not found", id)));
    }
    Ok(ok_empty())
}

/// Runs a doc task immediately through the configured handler.
///
/// The last-run marker is stamped whether the handler succeeds or not,
/// matching the scheduler's behavior.
pub async fn run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Envelope<()>>> {
    let task = DocTask::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("doc task {} not found", id)))?;

    let outcome = state.doc_handler.run(&task).await;

    if let Err(e) = DocTask::touch_last_doc(&state.db, id).await {
        warn!(doc_task_id = id, error = %e, "Failed to stamp last_doc_at");
    }

    outcome.map_err(|e| ApiError::Internal(format!("doc job failed: {}", e)))?;
    Ok(ok_empty())
}
