//! Task model: one fan-out job
//!
//! A task bundles an ordered list of SQL statements with a snapshot of the
//! target databases it runs against. The snapshot (`databases`) is taken at
//! creation: later instance syncs or deletions never mutate a task, they
//! only make its executions fail at run time.
//!
//! # State Machine
//!
//! ```text
//! pending → running → done
//!                  → failed      (catastrophic runner error only)
//! done/failed → pending          (reset)
//! ```
//!
//! After a normal run the task is always `done`, even when executions
//! failed; consumers distinguish outcomes through the counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Task status codes as persisted in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Running => 1,
            TaskStatus::Done => 2,
            TaskStatus::Failed => 3,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(TaskStatus::Pending),
            1 => Some(TaskStatus::Running),
            2 => Some(TaskStatus::Done),
            3 => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states can be reset and re-run.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

/// One target database in a task's snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDatabase {
    pub instance_id: i64,
    pub database_name: String,
    #[serde(default)]
    pub instance_name: String,
}

/// A fan-out job
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Unique task name
    pub task_name: String,

    pub description: String,

    /// JSON snapshot of the target set at creation:
    /// `[{instance_id, database_name, instance_name}]`
    pub databases: String,

    /// 0 pending, 1 running, 2 done, 3 failed
    pub status: i64,

    pub total_dbs: i64,
    pub completed_dbs: i64,
    pub failed_dbs: i64,
    pub total_sqls: i64,
    pub completed_sqls: i64,
    pub failed_sqls: i64,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub is_favorite: bool,
}

impl Task {
    /// Decodes the target snapshot.
    pub fn target_databases(&self) -> Vec<TaskDatabase> {
        serde_json::from_str(&self.databases).unwrap_or_default()
    }

    pub fn status_enum(&self) -> Option<TaskStatus> {
        TaskStatus::from_i64(self.status)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>("SELECT * FROM query_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn name_exists(pool: &SqlitePool, name: &str) -> Result<bool, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM query_tasks WHERE task_name = ?")
                .bind(name)
                .fetch_one(pool)
                .await?;
        Ok(count > 0)
    }

    /// Filtered, sorted, paginated task listing.
    ///
    /// `order_clause` must come from [`crate::models::Sorting::order_clause`]
    /// over the task column whitelist; it is interpolated, not bound.
    pub async fn list(
        pool: &SqlitePool,
        name_filter: Option<&str>,
        status: Option<i64>,
        is_favorite: Option<bool>,
        order_clause: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<Self>), sqlx::Error> {
        let mut conditions = Vec::new();
        if name_filter.is_some() {
            conditions.push("task_name LIKE ?");
        }
        if status.is_some() {
            conditions.push("status = ?");
        }
        if is_favorite.is_some() {
            conditions.push("is_favorite = ?");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let pattern = name_filter.map(|n| format!("{}%", n));

        let count_sql = format!("SELECT COUNT(*) FROM query_tasks{}", where_clause);
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        if let Some(p) = &pattern {
            count_query = count_query.bind(p);
        }
        if let Some(s) = status {
            count_query = count_query.bind(s);
        }
        if let Some(f) = is_favorite {
            count_query = count_query.bind(f);
        }
        let (total,) = count_query.fetch_one(pool).await?;

        let order = order_clause.unwrap_or("id DESC");
        let list_sql = format!(
            "SELECT * FROM query_tasks{} ORDER BY {} LIMIT ? OFFSET ?",
            where_clause, order
        );
        let mut list_query = sqlx::query_as::<_, Task>(&list_sql);
        if let Some(p) = &pattern {
            list_query = list_query.bind(p);
        }
        if let Some(s) = status {
            list_query = list_query.bind(s);
        }
        if let Some(f) = is_favorite {
            list_query = list_query.bind(f);
        }
        let items = list_query.bind(limit).bind(offset).fetch_all(pool).await?;

        Ok((total, items))
    }

    pub async fn set_status(
        pool: &SqlitePool,
        id: i64,
        status: TaskStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE query_tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_i64())
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Stamps `started_at` once; later runs after reset stamp again because
    /// reset clears the column.
    pub async fn mark_started(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE query_tasks SET started_at = ?, updated_at = ? WHERE id = ? AND started_at IS NULL",
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Marks a task done without touching counters (the empty-task path).
    pub async fn mark_done_empty(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE query_tasks SET status = ?, completed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(TaskStatus::Done.as_i64())
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Writes the final aggregate after a run, inside the caller's
    /// transaction.
    #[allow(clippy::too_many_arguments)]
    pub async fn write_aggregate(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: i64,
        total_dbs: i64,
        completed_dbs: i64,
        failed_dbs: i64,
        completed_sqls: i64,
        failed_sqls: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE query_tasks
            SET total_dbs = ?, completed_dbs = ?, failed_dbs = ?,
                completed_sqls = ?, failed_sqls = ?,
                status = ?, completed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(total_dbs)
        .bind(completed_dbs)
        .bind(failed_dbs)
        .bind(completed_sqls)
        .bind(failed_sqls)
        .bind(TaskStatus::Done.as_i64())
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn toggle_favorite(pool: &SqlitePool, id: i64) -> Result<Option<bool>, sqlx::Error> {
        let row: Option<(bool,)> = sqlx::query_as(
            r#"
            UPDATE query_tasks
            SET is_favorite = NOT is_favorite, updated_at = ?
            WHERE id = ?
            RETURNING is_favorite
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(f,)| f))
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM query_tasks")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    pub async fn count_by_status(pool: &SqlitePool, status: TaskStatus) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM query_tasks WHERE status = ?")
            .bind(status.as_i64())
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}
