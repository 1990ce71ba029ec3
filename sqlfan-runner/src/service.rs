//! Task read paths, reset and deletion
//!
//! The read side composes store queries in memory: one query per layer
//! (statements, then executions, then instances) rather than joins, so the
//! shapes stay cheap on the single-writer store. Reset and batch delete are
//! single-transaction writes.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlfan_shared::ident;
use sqlfan_shared::models::{
    ExecutionStatus, Instance, Pagination, Sorting, Task, TaskExecution, TaskSql, TaskStatus,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::info;

/// Read-path and maintenance error
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unknown sort column: {0}")]
    UnknownSortColumn(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Sortable columns of the task list
pub const TASK_SORT_COLUMNS: &[&str] = &[
    "id",
    "task_name",
    "status",
    "total_dbs",
    "total_sqls",
    "is_favorite",
    "created_at",
    "started_at",
    "completed_at",
];

/// Task list filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskListFilter {
    pub task_name: Option<String>,
    #[serde(default, deserialize_with = "sqlfan_shared::models::common::de::flexible_opt_i64")]
    pub status: Option<i64>,
    #[serde(default, deserialize_with = "sqlfan_shared::models::common::de::flexible_opt_bool")]
    pub is_favorite: Option<bool>,
    #[serde(flatten)]
    pub sorting: Sorting,
    #[serde(flatten)]
    pub pagination: Pagination,
}

/// Lists tasks with filters, whitelisted sorting and pagination.
pub async fn list_tasks(
    pool: &SqlitePool,
    mut filter: TaskListFilter,
) -> Result<(i64, Vec<Task>), ServiceError> {
    filter.pagination.normalize();
    let order = filter
        .sorting
        .order_clause(TASK_SORT_COLUMNS)
        .map_err(ServiceError::UnknownSortColumn)?;

    Ok(Task::list(
        pool,
        filter.task_name.as_deref(),
        filter.status,
        filter.is_favorite,
        order.as_deref(),
        filter.pagination.limit(),
        filter.pagination.offset(),
    )
    .await?)
}

/// One execution with its instance name resolved
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionDetail {
    #[serde(flatten)]
    pub execution: TaskExecution,
    pub instance_name: String,
}

/// One statement with its executions
#[derive(Debug, Clone, Serialize)]
pub struct SqlWithExecutions {
    pub id: i64,
    pub sql_order: i64,
    pub sql_content: String,
    pub executions: Vec<ExecutionDetail>,
}

/// Full execution detail of a task: statements, their executions, and
/// instance names, composed from one query per layer.
pub async fn get_sqls_with_executions(
    pool: &SqlitePool,
    task_id: i64,
) -> Result<Vec<SqlWithExecutions>, ServiceError> {
    let sqls = TaskSql::list_for_task(pool, task_id).await?;
    let sql_ids: Vec<i64> = sqls.iter().map(|s| s.id).collect();
    let executions = TaskExecution::list_for_sqls(pool, &sql_ids).await?;

    let mut instance_ids: Vec<i64> = executions.iter().map(|e| e.instance_id).collect();
    instance_ids.sort_unstable();
    instance_ids.dedup();
    let names: HashMap<i64, String> = Instance::find_by_ids(pool, &instance_ids)
        .await?
        .into_iter()
        .map(|i| (i.id, i.name))
        .collect();

    let mut grouped: HashMap<i64, Vec<ExecutionDetail>> = HashMap::new();
    for execution in executions {
        let instance_name = names
            .get(&execution.instance_id)
            .cloned()
            .unwrap_or_default();
        grouped
            .entry(execution.sql_id)
            .or_default()
            .push(ExecutionDetail {
                execution,
                instance_name,
            });
    }

    Ok(sqls
        .into_iter()
        .map(|sql| SqlWithExecutions {
            executions: grouped.remove(&sql.id).unwrap_or_default(),
            id: sql.id,
            sql_order: sql.sql_order,
            sql_content: sql.sql_content,
        })
        .collect())
}

/// Aggregate counts of one view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatCounts {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub pending: i64,
}

/// Execution statistics of a task: the per-target view and the per-statement
/// view
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExecutionStats {
    pub db: StatCounts,
    pub sql: StatCounts,
}

/// Computes both stat views over a task's executions.
///
/// The db view counts executions directly. The sql view groups by
/// statement and applies the roll-up rules: a statement is completed when
/// every execution succeeded, failed as soon as one failed, pending
/// otherwise.
pub async fn get_execution_stats(
    pool: &SqlitePool,
    task_id: i64,
) -> Result<ExecutionStats, ServiceError> {
    let executions = TaskExecution::list_for_task(pool, task_id).await?;

    let mut db = StatCounts {
        total: executions.len() as i64,
        ..Default::default()
    };
    for execution in &executions {
        match execution.status_enum() {
            Some(ExecutionStatus::Done) => db.completed += 1,
            Some(ExecutionStatus::Failed) => db.failed += 1,
            _ => db.pending += 1,
        }
    }

    let mut per_sql: HashMap<i64, (i64, i64, i64)> = HashMap::new();
    for execution in &executions {
        let entry = per_sql.entry(execution.sql_id).or_default();
        entry.0 += 1;
        match execution.status_enum() {
            Some(ExecutionStatus::Done) => entry.1 += 1,
            Some(ExecutionStatus::Failed) => entry.2 += 1,
            _ => {}
        }
    }

    let mut sql = StatCounts {
        total: per_sql.len() as i64,
        ..Default::default()
    };
    for (total, completed, failed) in per_sql.values() {
        if *failed > 0 {
            sql.failed += 1;
        } else if completed == total && *total > 0 {
            sql.completed += 1;
        } else {
            sql.pending += 1;
        }
    }

    Ok(ExecutionStats { db, sql })
}

/// One page of decoded result rows
#[derive(Debug, Clone, Serialize)]
pub struct ResultPage {
    pub total: i64,
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

/// Queries a statement's result table with logical-name filters and sort.
///
/// Filters and the sort column are translated through base64 encoding to
/// match the physical identifiers; row keys are decoded back to logical
/// names before returning.
pub async fn get_sql_result(
    pool: &SqlitePool,
    sql_id: i64,
    filters: &[(String, String)],
    sorting: &Sorting,
    mut pagination: Pagination,
) -> Result<ResultPage, ServiceError> {
    let sql = TaskSql::find_by_id(pool, sql_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("task sql {}", sql_id)))?;

    pagination.normalize();

    let schema = sql.schema();
    let logical_columns: Vec<String> = schema.fields.iter().map(|f| f.name.clone()).collect();
    let known: HashSet<&str> = logical_columns.iter().map(|s| s.as_str()).collect();

    let mut where_parts = Vec::new();
    let mut bound_values = Vec::new();
    for (column, value) in filters {
        if !known.contains(column.as_str()) {
            continue;
        }
        where_parts.push(format!("\"{}\" = ?", ident::encode(column)));
        bound_values.push(value.clone());
    }
    let where_clause = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };

    let order_clause = match sorting.sort_field.as_deref() {
        Some(field) if !field.is_empty() => {
            if !known.contains(field) {
                return Err(ServiceError::UnknownSortColumn(field.to_string()));
            }
            let direction = match sorting.sort_order.as_deref() {
                Some(o) if o.eq_ignore_ascii_case("asc") => "ASC",
                _ => "DESC",
            };
            format!(" ORDER BY \"{}\" {}", ident::encode(field), direction)
        }
        _ => format!(" ORDER BY \"{}\" ASC", ident::encode(ident::COL_EXECUTION_ID)),
    };

    let count_sql = format!(
        "SELECT COUNT(*) FROM \"{}\"{}",
        sql.result_table_name, where_clause
    );
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
    for value in &bound_values {
        count_query = count_query.bind(value);
    }
    let (total,) = count_query.fetch_one(pool).await?;

    let page_sql = format!(
        "SELECT * FROM \"{}\"{}{} LIMIT ? OFFSET ?",
        sql.result_table_name, where_clause, order_clause
    );
    let mut page_query = sqlx::query(&page_sql);
    for value in &bound_values {
        page_query = page_query.bind(value);
    }
    let rows = page_query
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(pool)
        .await?;

    let decoded: Vec<Map<String, Value>> = rows.iter().map(decode_result_row).collect();

    Ok(ResultPage {
        total,
        columns: logical_columns,
        rows: decoded,
    })
}

/// Full result-table content for export, in insertion order.
pub async fn fetch_all_results(
    pool: &SqlitePool,
    sql: &TaskSql,
) -> Result<(Vec<String>, Vec<Vec<Option<String>>>), ServiceError> {
    let schema = sql.schema();
    let logical_columns: Vec<String> = schema.fields.iter().map(|f| f.name.clone()).collect();

    let query = format!(
        "SELECT * FROM \"{}\" ORDER BY \"{}\" ASC",
        sql.result_table_name,
        ident::encode(ident::COL_EXECUTION_ID)
    );
    let rows = sqlx::query(&query).fetch_all(pool).await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let decoded = decode_result_row(row);
        out.push(
            logical_columns
                .iter()
                .map(|c| match decoded.get(c) {
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(Value::Null) | None => None,
                    Some(other) => Some(other.to_string()),
                })
                .collect(),
        );
    }

    Ok((logical_columns, out))
}

/// Decodes one result row: physical identifiers back to logical names,
/// cells to JSON values.
fn decode_result_row(row: &SqliteRow) -> Map<String, Value> {
    let mut out = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let logical = ident::decode(column.name()).unwrap_or_else(|| column.name().to_string());
        out.insert(logical, sqlite_cell_to_value(row, index));
    }
    out
}

fn sqlite_cell_to_value(row: &SqliteRow, index: usize) -> Value {
    let raw = match row.try_get_raw(index) {
        Ok(raw) => raw,
        Err(_) => return Value::Null,
    };
    if raw.is_null() {
        return Value::Null;
    }
    let type_name = raw.type_info().name().to_string();
    drop(raw);

    match type_name.as_str() {
        "INTEGER" => row
            .try_get::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" => row
            .try_get::<f64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
    }
}

/// Resets a terminal task back to pending, in one transaction: executions
/// cleared, statement counters cleared, result tables emptied (structure
/// preserved), task counters cleared.
///
/// A task that is not `done` or `failed` is left untouched; returns whether
/// a reset happened.
pub async fn reset_task(pool: &SqlitePool, task_id: i64) -> Result<bool, ServiceError> {
    let task = Task::find_by_id(pool, task_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("task {}", task_id)))?;

    if !task.status_enum().is_some_and(|s| s.is_terminal()) {
        return Ok(false);
    }

    let sqls = TaskSql::list_for_task(pool, task_id).await?;
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE query_task_executions
        SET status = ?, error_message = '', result_count = NULL,
            execution_time = NULL, started_at = NULL, completed_at = NULL,
            updated_at = ?
        WHERE task_id = ?
        "#,
    )
    .bind(ExecutionStatus::Pending.as_i64())
    .bind(now)
    .bind(task_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE query_task_sqls
        SET completed_dbs = 0, failed_dbs = 0, started_at = NULL,
            completed_at = NULL, updated_at = ?
        WHERE task_id = ?
        "#,
    )
    .bind(now)
    .bind(task_id)
    .execute(&mut *tx)
    .await?;

    for sql in &sqls {
        let delete = format!("DELETE FROM \"{}\"", sql.result_table_name);
        sqlx::query(&delete).execute(&mut *tx).await?;
    }

    sqlx::query(
        r#"
        UPDATE query_tasks
        SET status = ?, completed_dbs = 0, failed_dbs = 0,
            completed_sqls = 0, failed_sqls = 0,
            started_at = NULL, completed_at = NULL, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(TaskStatus::Pending.as_i64())
    .bind(now)
    .bind(task_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(task_id, "Task reset to pending");
    Ok(true)
}

/// Deletes tasks, their statements, executions and result tables, in one
/// transaction.
pub async fn batch_delete_tasks(pool: &SqlitePool, task_ids: &[i64]) -> Result<(), ServiceError> {
    if task_ids.is_empty() {
        return Ok(());
    }

    let sqls = TaskSql::list_for_tasks(pool, task_ids).await?;
    let placeholders = vec!["?"; task_ids.len()].join(", ");

    let mut tx = pool.begin().await?;

    let delete_executions = format!(
        "DELETE FROM query_task_executions WHERE task_id IN ({})",
        placeholders
    );
    let mut query = sqlx::query(&delete_executions);
    for id in task_ids {
        query = query.bind(id);
    }
    query.execute(&mut *tx).await?;

    let delete_sqls = format!(
        "DELETE FROM query_task_sqls WHERE task_id IN ({})",
        placeholders
    );
    let mut query = sqlx::query(&delete_sqls);
    for id in task_ids {
        query = query.bind(id);
    }
    query.execute(&mut *tx).await?;

    let delete_tasks = format!("DELETE FROM query_tasks WHERE id IN ({})", placeholders);
    let mut query = sqlx::query(&delete_tasks);
    for id in task_ids {
        query = query.bind(id);
    }
    query.execute(&mut *tx).await?;

    for sql in &sqls {
        let drop = format!("DROP TABLE IF EXISTS \"{}\"", sql.result_table_name);
        sqlx::query(&drop).execute(&mut *tx).await?;
    }

    tx.commit().await?;

    info!(count = task_ids.len(), "Tasks deleted");
    Ok(())
}

/// Stamp to record on a task when the runner itself blows up.
pub async fn mark_task_failed(pool: &SqlitePool, task_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE query_tasks SET status = ?, completed_at = ?, updated_at = ? WHERE id = ?")
        .bind(TaskStatus::Failed.as_i64())
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(task_id)
        .execute(pool)
        .await?;
    Ok(())
}
