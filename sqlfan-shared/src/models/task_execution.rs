//! TaskExecution model: one `(statement, target database)` crossing
//!
//! Executions are seeded as `pending` when the task is created, one per
//! statement per target. The runner drives each to `done` or `failed`;
//! execution-scoped failures (connection, SQL error, timeout) are recorded
//! in `error_message` and never abort the task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqlitePool, Transaction};

/// Execution status codes as persisted in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl ExecutionStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            ExecutionStatus::Pending => 0,
            ExecutionStatus::Running => 1,
            ExecutionStatus::Done => 2,
            ExecutionStatus::Failed => 3,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(ExecutionStatus::Pending),
            1 => Some(ExecutionStatus::Running),
            2 => Some(ExecutionStatus::Done),
            3 => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Done | ExecutionStatus::Failed)
    }
}

/// One execution of one statement against one target database
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskExecution {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub task_id: i64,
    pub sql_id: i64,
    pub instance_id: i64,
    pub database_name: String,

    /// 0 pending, 1 running, 2 done, 3 failed
    pub status: i64,

    pub error_message: String,

    /// Rows returned by the statement, for successes
    pub result_count: Option<i64>,

    /// Wall-clock duration of the query race, milliseconds
    pub execution_time: Option<i64>,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskExecution {
    pub fn status_enum(&self) -> Option<ExecutionStatus> {
        ExecutionStatus::from_i64(self.status)
    }

    /// The `(instance_id, database_name)` target key of this execution.
    pub fn db_key(&self) -> (i64, String) {
        (self.instance_id, self.database_name.clone())
    }

    /// Seeds one pending execution inside the creation transaction.
    pub async fn insert_pending(
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        task_id: i64,
        sql_id: i64,
        instance_id: i64,
        database_name: &str,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO query_task_executions
                (created_at, updated_at, task_id, sql_id, instance_id,
                 database_name, status, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, '')
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(task_id)
        .bind(sql_id)
        .bind(instance_id)
        .bind(database_name)
        .bind(ExecutionStatus::Pending.as_i64())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn list_for_task(pool: &SqlitePool, task_id: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, TaskExecution>(
            "SELECT * FROM query_task_executions WHERE task_id = ? ORDER BY id ASC",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await
    }

    pub async fn list_for_sqls(
        pool: &SqlitePool,
        sql_ids: &[i64],
    ) -> Result<Vec<Self>, sqlx::Error> {
        if sql_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; sql_ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM query_task_executions WHERE sql_id IN ({}) ORDER BY id ASC",
            placeholders
        );
        let mut query = sqlx::query_as::<_, TaskExecution>(&sql);
        for id in sql_ids {
            query = query.bind(id);
        }
        query.fetch_all(pool).await
    }

    /// Applies a terminal execution update; used by the batched persistence
    /// writer inside its transaction.
    pub async fn apply_terminal(
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        execution: &TaskExecution,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE query_task_executions
            SET status = ?, error_message = ?, result_count = ?,
                execution_time = ?, started_at = ?, completed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(execution.status)
        .bind(&execution.error_message)
        .bind(execution.result_count)
        .bind(execution.execution_time)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(Utc::now())
        .bind(execution.id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM query_task_executions")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    pub async fn count_by_status(
        pool: &SqlitePool,
        status: ExecutionStatus,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM query_task_executions WHERE status = ?")
                .bind(status.as_i64())
                .fetch_one(pool)
                .await?;
        Ok(count)
    }
}
