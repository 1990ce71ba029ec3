//! Dashboard aggregate counters

use crate::{
    app::AppState,
    error::{ok, ApiResult, Envelope},
};
use axum::{extract::State, Json};
use serde::Serialize;
use sqlfan_shared::models::{
    Database, ExecutionStatus, Instance, Task, TaskExecution, TaskStatus,
};

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub instances: i64,
    pub databases: i64,
    pub tasks: i64,
    pub running_tasks: i64,
    pub done_tasks: i64,
    pub executions: i64,
    pub failed_executions: i64,
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<Envelope<DashboardStats>>> {
    Ok(ok(DashboardStats {
        instances: Instance::count(&state.db).await?,
        databases: Database::count(&state.db).await?,
        tasks: Task::count(&state.db).await?,
        running_tasks: Task::count_by_status(&state.db, TaskStatus::Running).await?,
        done_tasks: Task::count_by_status(&state.db, TaskStatus::Done).await?,
        executions: TaskExecution::count(&state.db).await?,
        failed_executions: TaskExecution::count_by_status(&state.db, ExecutionStatus::Failed)
            .await?,
    }))
}
