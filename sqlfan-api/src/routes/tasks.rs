//! Query-task endpoints: the HTTP surface of the task pipeline

use crate::{
    app::AppState,
    error::{ok, ok_empty, ApiError, ApiResult, Envelope},
};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlfan_runner::creator::CreateTaskRequest;
use sqlfan_runner::service::{
    self, ExecutionStats, ResultPage, SqlWithExecutions, TaskListFilter,
};
use sqlfan_shared::models::{Pagination, Sorting, Task, TaskSql, TaskStatus};
use tracing::error;

/// Creates a task (§ task creation pipeline).
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<Json<Envelope<Task>>> {
    if req.task_name.trim().is_empty() {
        return Err(ApiError::BadRequest("task_name is required".to_string()));
    }
    if req.sql_content.trim().is_empty() {
        return Err(ApiError::BadRequest("sql_content is required".to_string()));
    }
    if req.database_mode != "include" && req.database_mode != "exclude" {
        return Err(ApiError::BadRequest(
            "database_mode must be include or exclude".to_string(),
        ));
    }
    if req.database_mode == "exclude" && req.instance_ids.is_empty() {
        return Err(ApiError::BadRequest(
            "instance_ids is required in exclude mode".to_string(),
        ));
    }
    if req.database_mode == "include" && req.selected_dbs.is_empty() {
        return Err(ApiError::BadRequest(
            "selected_dbs is required in include mode".to_string(),
        ));
    }

    let task = state.creator.create(&req).await?;
    Ok(ok(task))
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub total: i64,
    pub items: Vec<Task>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<TaskListFilter>,
) -> ApiResult<Json<Envelope<ListResponse>>> {
    let (total, items) = service::list_tasks(&state.db, filter).await?;
    Ok(ok(ListResponse { total, items }))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Envelope<Task>>> {
    let task = Task::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {} not found", id)))?;
    Ok(ok(task))
}

#[derive(Debug, Deserialize)]
pub struct BatchDeleteRequest {
    pub task_ids: Vec<i64>,
}

pub async fn batch_delete(
    State(state): State<AppState>,
    Json(req): Json<BatchDeleteRequest>,
) -> ApiResult<Json<Envelope<()>>> {
    if req.task_ids.is_empty() {
        return Err(ApiError::BadRequest("task_ids is required".to_string()));
    }
    service::batch_delete_tasks(&state.db, &req.task_ids).await?;
    Ok(ok_empty())
}

/// Runs a task asynchronously.
///
/// A terminal task is reset first. The `running` transition happens here,
/// synchronously, before the runner is dispatched; the response returns
/// immediately while the fan-out proceeds in the background.
pub async fn run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Envelope<Task>>> {
    let task = Task::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {} not found", id)))?;

    match task.status_enum() {
        Some(TaskStatus::Running) => {
            return Err(ApiError::Conflict(format!("task {} is already running", id)));
        }
        Some(status) if status.is_terminal() => {
            service::reset_task(&state.db, id).await?;
        }
        _ => {}
    }

    Task::set_status(&state.db, id, TaskStatus::Running).await?;

    let runner = state.runner.clone();
    let pool = state.db.clone();
    tokio::spawn(async move {
        if let Err(e) = runner.run(id).await {
            error!(task_id = id, error = %e, "Task run failed");
            if let Err(e) = service::mark_task_failed(&pool, id).await {
                error!(task_id = id, error = %e, "Failed to mark task failed");
            }
        }
    });

    let task = Task::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {} not found", id)))?;
    Ok(ok(task))
}

#[derive(Debug, Serialize)]
pub struct ToggleFavoriteResponse {
    pub is_favorite: bool,
}

pub async fn toggle_favorite(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Envelope<ToggleFavoriteResponse>>> {
    let is_favorite = Task::toggle_favorite(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {} not found", id)))?;
    Ok(ok(ToggleFavoriteResponse { is_favorite }))
}

#[derive(Debug, Serialize)]
pub struct SqlListResponse {
    pub total: i64,
    pub items: Vec<TaskSql>,
}

pub async fn sqls(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Envelope<SqlListResponse>>> {
    let items = TaskSql::list_for_task(&state.db, id).await?;
    Ok(ok(SqlListResponse {
        total: items.len() as i64,
        items,
    }))
}

pub async fn sqls_with_executions(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Envelope<Vec<SqlWithExecutions>>>> {
    let items = service::get_sqls_with_executions(&state.db, id).await?;
    Ok(ok(items))
}

pub async fn execution_stats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Envelope<ExecutionStats>>> {
    let stats = service::get_execution_stats(&state.db, id).await?;
    Ok(ok(stats))
}

#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    /// JSON object of logical column name → exact value
    pub filters: Option<String>,
    #[serde(flatten)]
    pub sorting: Sorting,
    #[serde(flatten)]
    pub pagination: Pagination,
}

pub async fn sql_results(
    State(state): State<AppState>,
    Path(sql_id): Path<i64>,
    Query(query): Query<ResultQuery>,
) -> ApiResult<Json<Envelope<ResultPage>>> {
    let filters: Vec<(String, String)> = match &query.filters {
        Some(raw) if !raw.is_empty() => {
            let parsed: serde_json::Map<String, serde_json::Value> = serde_json::from_str(raw)
                .map_err(|_| ApiError::BadRequest("filters must be a JSON object".to_string()))?;
            parsed
                .into_iter()
                .map(|(column, value)| {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (column, value)
                })
                .collect()
        }
        _ => Vec::new(),
    };

    let page = service::get_sql_result(
        &state.db,
        sql_id,
        &filters,
        &query.sorting,
        query.pagination,
    )
    .await?;
    Ok(ok(page))
}

/// Streams a statement's full result table as CSV.
///
/// UTF-8 BOM prefix so spreadsheet tools pick up the encoding; headers are
/// the logical column names.
pub async fn sql_export(
    State(state): State<AppState>,
    Path(sql_id): Path<i64>,
) -> ApiResult<Response> {
    let sql = TaskSql::find_by_id(&state.db, sql_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task sql {} not found", sql_id)))?;

    let (headers, rows) = service::fetch_all_results(&state.db, &sql).await?;

    let mut body: Vec<u8> = vec![0xEF, 0xBB, 0xBF];
    {
        let mut writer = csv::Writer::from_writer(&mut body);
        writer
            .write_record(&headers)
            .map_err(|e| ApiError::Internal(format!("csv write failed: {}", e)))?;
        for row in &rows {
            let record: Vec<&str> = row.iter().map(|v| v.as_deref().unwrap_or("")).collect();
            writer
                .write_record(&record)
                .map_err(|e| ApiError::Internal(format!("csv write failed: {}", e)))?;
        }
        writer
            .flush()
            .map_err(|e| ApiError::Internal(format!("csv flush failed: {}", e)))?;
    }

    let filename = format!("{}.csv", sql.result_table_name);
    let response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response();

    Ok(response)
}
