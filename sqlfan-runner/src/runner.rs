//! The concurrent fan-out engine
//!
//! Executes every pending execution of a task against its target database.
//! Statements run in strict `sql_order`: all executions of statement k
//! reach a terminal state before statement k+1 starts (statements often
//! depend on prior statements' side effects). Within one statement,
//! executions fan out across targets, bounded by `concurrency` worker
//! permits.
//!
//! # Architecture
//!
//! ```text
//! TaskRunner::run
//!   ├─> TargetPools: lazy per-target MySQL pools, closed on exit
//!   ├─> Semaphore(concurrency): worker permits
//!   ├─> worker per execution: query/timeout race, row mapping
//!   │     ├─> status channel  → collector (in-memory roll-up)
//!   │     └─> persist queue   → batched store writer
//!   ├─> per-SQL row buffer, bulk-inserted at 1000 rows
//!   └─> final aggregation in one local transaction
//! ```
//!
//! A connection or query failure affects only its own execution; the
//! runner never aborts the whole task on a single failure.

use chrono::Utc;
use sqlfan_shared::config_cache::ConfigCache;
use sqlfan_shared::db::target::TargetPools;
use sqlfan_shared::ident;
use sqlfan_shared::models::{
    ExecutionStatus, Instance, Task, TaskExecution, TaskSql,
};
use sqlx::mysql::MySqlRow;
use sqlx::sqlite::Sqlite;
use sqlx::{Column, QueryBuilder, Row, SqlitePool, TypeInfo, ValueRef};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::persist;

/// Rows buffered per statement before a bulk insert
const ROW_BUFFER_SIZE: usize = 1000;

/// SQLite bind-variable budget for one bulk insert
const MAX_BIND_VARS: usize = 32_000;

/// Catastrophic runner error; execution-scoped failures never surface here
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("task not found: {0}")]
    TaskNotFound(i64),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Terminal status message streamed by workers
#[derive(Debug, Clone)]
struct StatusUpdate {
    sql_id: i64,
    instance_id: i64,
    database_name: String,
    status: ExecutionStatus,
}

/// In-memory roll-up of terminal statuses, kept by the collector
#[derive(Debug, Default)]
struct StatusBoard {
    /// per statement: (completed, failed)
    sql_stats: HashMap<i64, (i64, i64)>,

    /// per target key: (saw done, saw failed)
    db_states: HashMap<(i64, String), (bool, bool)>,
}

impl StatusBoard {
    fn record(&mut self, update: StatusUpdate) {
        let stat = self.sql_stats.entry(update.sql_id).or_default();
        let state = self
            .db_states
            .entry((update.instance_id, update.database_name))
            .or_default();
        match update.status {
            ExecutionStatus::Done => {
                stat.0 += 1;
                state.0 = true;
            }
            ExecutionStatus::Failed => {
                stat.1 += 1;
                state.1 = true;
            }
            _ => {}
        }
    }
}

/// Shared per-statement context for workers
struct SqlJob {
    sql_id: i64,
    content: String,
    result_table: String,

    /// Logical insert columns in schema order, primary key excluded
    logical_columns: Vec<String>,

    /// base64-url forms of `logical_columns`, same order
    physical_columns: Vec<String>,

    /// Row buffer shared by every worker of this statement
    buffer: Mutex<Vec<Vec<Option<String>>>>,
}

impl SqlJob {
    fn from_task_sql(sql: &TaskSql) -> Self {
        let logical_columns: Vec<String> = sql
            .schema()
            .fields
            .iter()
            .map(|f| f.name.clone())
            .filter(|name| name != ident::COL_EXECUTION_ID)
            .collect();
        let physical_columns = logical_columns.iter().map(|c| ident::encode(c)).collect();

        SqlJob {
            sql_id: sql.id,
            content: sql.sql_content.clone(),
            result_table: sql.result_table_name.clone(),
            logical_columns,
            physical_columns,
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Appends a row; returns a drained batch once the buffer is full.
    fn append(&self, row: Vec<Option<String>>) -> Option<Vec<Vec<Option<String>>>> {
        let mut buffer = self.buffer.lock().expect("row buffer lock poisoned");
        buffer.push(row);
        if buffer.len() >= ROW_BUFFER_SIZE {
            Some(std::mem::take(&mut *buffer))
        } else {
            None
        }
    }

    fn drain(&self) -> Vec<Vec<Option<String>>> {
        std::mem::take(&mut *self.buffer.lock().expect("row buffer lock poisoned"))
    }
}

/// Runs fan-out tasks
pub struct TaskRunner {
    pool: SqlitePool,
    configs: Arc<ConfigCache>,
}

impl TaskRunner {
    pub fn new(pool: SqlitePool, configs: Arc<ConfigCache>) -> Self {
        TaskRunner { pool, configs }
    }

    /// Executes a task to completion.
    ///
    /// The caller is expected to have marked the task `running`. After a
    /// normal pass the task ends `done` regardless of per-execution
    /// failures; [`RunnerError`] is reserved for catastrophic conditions.
    pub async fn run(&self, task_id: i64) -> Result<(), RunnerError> {
        let task = Task::find_by_id(&self.pool, task_id)
            .await?
            .ok_or(RunnerError::TaskNotFound(task_id))?;

        let sqls = TaskSql::list_for_task(&self.pool, task_id).await?;
        let executions = TaskExecution::list_for_task(&self.pool, task_id).await?;

        if executions.is_empty() {
            info!(task_id, "Task has no executions, marking done");
            Task::mark_done_empty(&self.pool, task_id).await?;
            return Ok(());
        }

        let instances = self.load_instances(&executions).await?;
        let settings = self.configs.runner_settings().await;

        info!(
            task_id,
            statements = sqls.len(),
            executions = executions.len(),
            concurrency = settings.concurrency,
            "Task run starting"
        );

        Task::mark_started(&self.pool, task_id).await?;

        let targets = Arc::new(TargetPools::new(settings.max_conn));
        let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        let timeout = Duration::from_secs(settings.query_timeout_sec.max(1));

        let (persist_tx, persist_handle) = persist::spawn_writer(self.pool.clone());
        let (status_tx, mut status_rx) = mpsc::unbounded_channel::<StatusUpdate>();
        let collector = tokio::spawn(async move {
            let mut board = StatusBoard::default();
            while let Some(update) = status_rx.recv().await {
                board.record(update);
            }
            board
        });

        // index executions by statement
        let mut by_sql: HashMap<i64, Vec<TaskExecution>> = HashMap::new();
        for execution in executions.iter().cloned() {
            by_sql.entry(execution.sql_id).or_default().push(execution);
        }

        // per-SQL barrier: statement k+1 starts only after statement k
        for sql in &sqls {
            TaskSql::mark_started(&self.pool, sql.id).await?;

            let job = Arc::new(SqlJob::from_task_sql(sql));
            let mut handles = Vec::new();

            for execution in by_sql.remove(&sql.id).unwrap_or_default() {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("worker semaphore closed");

                let instance = instances.get(&execution.instance_id).cloned();
                let worker = execute_one(
                    execution,
                    job.clone(),
                    instance,
                    targets.clone(),
                    self.pool.clone(),
                    timeout,
                    status_tx.clone(),
                    persist_tx.clone(),
                    permit,
                );
                handles.push(tokio::spawn(worker));
            }

            for handle in handles {
                if let Err(e) = handle.await {
                    error!(task_id, sql_id = sql.id, error = %e, "Worker panicked");
                }
            }

            // residual rows of this statement
            let residue = job.drain();
            if !residue.is_empty() {
                insert_result_rows(
                    &self.pool,
                    &job.result_table,
                    &job.physical_columns,
                    residue,
                )
                .await;
            }
        }

        targets.close_all().await;

        // drain the persistence queue, then collect the status board
        drop(persist_tx);
        if let Err(e) = persist_handle.await {
            error!(task_id, error = %e, "Persistence writer panicked");
        }
        drop(status_tx);
        let board = collector.await.unwrap_or_default();

        self.aggregate(task.id, &sqls, &executions, &board).await?;

        info!(task_id, "Task run finished");
        Ok(())
    }

    async fn load_instances(
        &self,
        executions: &[TaskExecution],
    ) -> Result<HashMap<i64, Instance>, sqlx::Error> {
        let mut ids: Vec<i64> = executions.iter().map(|e| e.instance_id).collect();
        ids.sort_unstable();
        ids.dedup();

        let instances = Instance::find_by_ids(&self.pool, &ids).await?;
        Ok(instances.into_iter().map(|i| (i.id, i)).collect())
    }

    /// Final roll-up, one local transaction.
    ///
    /// A target database counts as completed only when it saw at least one
    /// success and no failure; one failure marks it failed outright. A
    /// statement counts as completed when every one of its executions
    /// succeeded, and as failed as soon as any execution failed.
    async fn aggregate(
        &self,
        task_id: i64,
        sqls: &[TaskSql],
        executions: &[TaskExecution],
        board: &StatusBoard,
    ) -> Result<(), sqlx::Error> {
        let mut db_keys: Vec<(i64, String)> = executions.iter().map(|e| e.db_key()).collect();
        db_keys.sort();
        db_keys.dedup();
        let total_dbs = db_keys.len() as i64;

        let mut completed_dbs = 0i64;
        let mut failed_dbs = 0i64;
        for key in &db_keys {
            match board.db_states.get(key) {
                Some((_, true)) => failed_dbs += 1,
                Some((true, false)) => completed_dbs += 1,
                _ => {}
            }
        }

        let mut totals_per_sql: HashMap<i64, i64> = HashMap::new();
        for execution in executions {
            *totals_per_sql.entry(execution.sql_id).or_default() += 1;
        }

        let mut completed_sqls = 0i64;
        let mut failed_sqls = 0i64;

        let mut tx = self.pool.begin().await?;
        for sql in sqls {
            let total = totals_per_sql.get(&sql.id).copied().unwrap_or(0);
            let (completed, failed) = board.sql_stats.get(&sql.id).copied().unwrap_or((0, 0));

            if total > 0 && completed == total {
                completed_sqls += 1;
            }
            if failed > 0 {
                failed_sqls += 1;
            }

            TaskSql::write_aggregate(&mut tx, sql.id, completed, failed, completed + failed == total)
                .await?;
        }

        Task::write_aggregate(
            &mut tx,
            task_id,
            total_dbs,
            completed_dbs,
            failed_dbs,
            completed_sqls,
            failed_sqls,
        )
        .await?;
        tx.commit().await?;

        debug!(
            task_id,
            total_dbs, completed_dbs, failed_dbs, completed_sqls, failed_sqls,
            "Task aggregate written"
        );
        Ok(())
    }
}

/// Executes one `(statement, target)` crossing.
#[allow(clippy::too_many_arguments)]
async fn execute_one(
    mut execution: TaskExecution,
    job: Arc<SqlJob>,
    instance: Option<Instance>,
    targets: Arc<TargetPools>,
    store: SqlitePool,
    timeout: Duration,
    status_tx: mpsc::UnboundedSender<StatusUpdate>,
    persist_tx: mpsc::Sender<TaskExecution>,
    _permit: OwnedSemaphorePermit,
) {
    execution.started_at = Some(Utc::now());
    let clock = Instant::now();

    let outcome: Result<(), String> = async {
        let instance = instance.as_ref().ok_or_else(|| "instance not found".to_string())?;

        let pool = targets
            .acquire(instance, &execution.database_name)
            .await
            .map_err(|e| format!("connection failed: {}", e))?;

        let query = sqlx::query(job.content.as_str()).fetch_all(&pool);
        let rows = match tokio::time::timeout(timeout, query).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => return Err(format!("sql execution failed: {}", e)),
            // the in-flight query is abandoned; the driver cancels best-effort
            Err(_) => return Err("sql execution timeout".to_string()),
        };

        execution.result_count = Some(rows.len() as i64);
        buffer_rows(&job, &execution, instance, rows, &store).await;
        Ok(())
    }
    .await;

    execution.execution_time = Some(clock.elapsed().as_millis() as i64);
    execution.completed_at = Some(Utc::now());

    match outcome {
        Ok(()) => {
            execution.status = ExecutionStatus::Done.as_i64();
            execution.error_message.clear();
        }
        Err(message) => {
            warn!(
                execution_id = execution.id,
                instance_id = execution.instance_id,
                database = %execution.database_name,
                error = %message,
                "Execution failed"
            );
            execution.status = ExecutionStatus::Failed.as_i64();
            execution.error_message = message;
        }
    }

    let _ = status_tx.send(StatusUpdate {
        sql_id: execution.sql_id,
        instance_id: execution.instance_id,
        database_name: execution.database_name.clone(),
        status: execution.status_enum().unwrap_or(ExecutionStatus::Failed),
    });

    if persist_tx.send(execution).await.is_err() {
        error!("Persistence queue closed before execution could be enqueued");
    }
}

/// Maps returned rows through the statement schema into the shared buffer,
/// bulk-inserting whenever the buffer fills.
async fn buffer_rows(
    job: &SqlJob,
    execution: &TaskExecution,
    instance: &Instance,
    rows: Vec<MySqlRow>,
    store: &SqlitePool,
) {
    for row in rows {
        let mut values: HashMap<&str, Option<String>> = HashMap::new();
        for (index, column) in row.columns().iter().enumerate() {
            values.insert(column.name(), cell_to_string(&row, index));
        }

        let mapped: Vec<Option<String>> = job
            .logical_columns
            .iter()
            .map(|logical| match logical.as_str() {
                ident::COL_INSTANCE_ID => Some(execution.instance_id.to_string()),
                ident::COL_INSTANCE_NAME => Some(instance.name.clone()),
                ident::COL_DATABASE_NAME => Some(execution.database_name.clone()),
                ident::COL_ERROR_MESSAGE => Some(String::new()),
                name => values.get(name).cloned().flatten(),
            })
            .collect();

        if let Some(batch) = job.append(mapped) {
            insert_result_rows(store, &job.result_table, &job.physical_columns, batch).await;
        }
    }
}

/// Bulk-inserts mapped rows into a result table, chunked to stay inside
/// SQLite's bind-variable budget. Failures are logged, not propagated: a
/// lost batch must not fail the execution that produced it.
async fn insert_result_rows(
    store: &SqlitePool,
    table: &str,
    physical_columns: &[String],
    rows: Vec<Vec<Option<String>>>,
) {
    if rows.is_empty() || physical_columns.is_empty() {
        return;
    }

    let column_list = physical_columns
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ");

    let rows_per_chunk = (MAX_BIND_VARS / physical_columns.len()).max(1);

    for chunk in rows.chunks(rows_per_chunk) {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "INSERT INTO \"{}\" ({}) ",
            table, column_list
        ));
        builder.push_values(chunk.iter(), |mut b, row| {
            for value in row {
                b.push_bind(value.clone());
            }
        });

        if let Err(e) = builder.build().execute(store).await {
            error!(table, rows = chunk.len(), error = %e, "Result insert failed");
        }
    }
}

/// Renders one MySQL cell as text for the TEXT-typed result columns.
fn cell_to_string(row: &MySqlRow, index: usize) -> Option<String> {
    let raw = row.try_get_raw(index).ok()?;
    if raw.is_null() {
        return None;
    }
    let type_name = raw.type_info().name().to_string();
    drop(raw);

    match type_name.as_str() {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            row.try_get::<i64, _>(index).ok().map(|v| v.to_string())
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row.try_get::<u64, _>(index).ok().map(|v| v.to_string()),
        "FLOAT" | "DOUBLE" => row.try_get::<f64, _>(index).ok().map(|v| v.to_string()),
        "BOOLEAN" => row.try_get::<bool, _>(index).ok().map(|v| v.to_string()),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(index)
            .ok()
            .map(|v| v.to_string()),
        "TIME" => row
            .try_get::<chrono::NaiveTime, _>(index)
            .ok()
            .map(|v| v.to_string()),
        "DATETIME" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .ok()
            .map(|v| v.format("%Y-%m-%d %H:%M:%S").to_string()),
        "TIMESTAMP" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
            .ok()
            .map(|v| v.format("%Y-%m-%d %H:%M:%S").to_string()),
        _ => row
            .try_get::<String, _>(index)
            .ok()
            .or_else(|| {
                row.try_get::<Vec<u8>, _>(index)
                    .ok()
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            })
            .or_else(|| row.try_get_unchecked::<String, _>(index).ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlfan_shared::models::{TableField, TableSchema};

    fn task_sql_with_schema(fields: Vec<TableField>) -> TaskSql {
        TaskSql {
            id: 9,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            task_id: 1,
            sql_order: 1,
            sql_content: "SELECT 1".to_string(),
            result_table_name: "task_1_sql_1_result".to_string(),
            result_table_schema: serde_json::to_string(&TableSchema { fields }).unwrap(),
            total_dbs: 0,
            completed_dbs: 0,
            failed_dbs: 0,
            started_at: None,
            completed_at: None,
        }
    }

    fn field(name: &str) -> TableField {
        TableField {
            name: name.to_string(),
            field_type: "TEXT".to_string(),
            comment: String::new(),
        }
    }

    #[test]
    fn test_sql_job_excludes_primary_key() {
        let sql = task_sql_with_schema(vec![field(ident::COL_EXECUTION_ID), field("x")]);
        let job = SqlJob::from_task_sql(&sql);
        assert_eq!(job.logical_columns, vec!["x"]);
        assert_eq!(job.physical_columns, vec![ident::encode("x")]);
    }

    #[test]
    fn test_sql_job_buffer_flush_threshold() {
        let sql = task_sql_with_schema(vec![field("x")]);
        let job = SqlJob::from_task_sql(&sql);

        for _ in 0..ROW_BUFFER_SIZE - 1 {
            assert!(job.append(vec![Some("v".to_string())]).is_none());
        }
        let batch = job.append(vec![Some("v".to_string())]).unwrap();
        assert_eq!(batch.len(), ROW_BUFFER_SIZE);
        assert!(job.drain().is_empty());
    }

    #[test]
    fn test_status_board_db_failure_wins() {
        let mut board = StatusBoard::default();
        board.record(StatusUpdate {
            sql_id: 1,
            instance_id: 1,
            database_name: "a".to_string(),
            status: ExecutionStatus::Done,
        });
        board.record(StatusUpdate {
            sql_id: 2,
            instance_id: 1,
            database_name: "a".to_string(),
            status: ExecutionStatus::Failed,
        });

        let state = board.db_states.get(&(1, "a".to_string())).unwrap();
        assert_eq!(*state, (true, true));
        assert_eq!(board.sql_stats[&1], (1, 0));
        assert_eq!(board.sql_stats[&2], (0, 1));
    }
}
