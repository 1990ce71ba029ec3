//! TaskSql model: one statement within a task
//!
//! Each statement owns exactly one result table, named deterministically
//! `task_{task_id}_sql_{sql_order}_result`, created when the task is
//! created and dropped when the task is deleted. The logical result schema
//! lives in `result_table_schema` as JSON; the physical table uses
//! base64-url column identifiers (see [`crate::ident`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// One field of a result-table schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub comment: String,
}

/// Ordered result-table schema, stored as JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<TableField>,
}

/// One SQL statement within a task
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskSql {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub task_id: i64,

    /// 1-based position within the task; executions of statement k complete
    /// before statement k+1 starts
    pub sql_order: i64,

    pub sql_content: String,

    pub result_table_name: String,

    /// JSON of [`TableSchema`]
    pub result_table_schema: String,

    pub total_dbs: i64,
    pub completed_dbs: i64,
    pub failed_dbs: i64,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Deterministic result-table name for a statement.
pub fn result_table_name(task_id: i64, sql_order: i64) -> String {
    format!("task_{}_sql_{}_result", task_id, sql_order)
}

impl TaskSql {
    /// Decodes the stored schema JSON.
    pub fn schema(&self) -> TableSchema {
        serde_json::from_str(&self.result_table_schema).unwrap_or_default()
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, TaskSql>("SELECT * FROM query_task_sqls WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Statements of a task in execution order.
    pub async fn list_for_task(pool: &SqlitePool, task_id: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, TaskSql>(
            "SELECT * FROM query_task_sqls WHERE task_id = ? ORDER BY sql_order ASC",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await
    }

    pub async fn list_for_tasks(
        pool: &SqlitePool,
        task_ids: &[i64],
    ) -> Result<Vec<Self>, sqlx::Error> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; task_ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM query_task_sqls WHERE task_id IN ({})",
            placeholders
        );
        let mut query = sqlx::query_as::<_, TaskSql>(&sql);
        for id in task_ids {
            query = query.bind(id);
        }
        query.fetch_all(pool).await
    }

    pub async fn mark_started(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE query_task_sqls SET started_at = ?, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Writes the per-statement aggregate inside the caller's transaction;
    /// `completed_at` is stamped only when every execution reached a
    /// terminal state.
    pub async fn write_aggregate(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: i64,
        completed_dbs: i64,
        failed_dbs: i64,
        all_terminal: bool,
    ) -> Result<(), sqlx::Error> {
        if all_terminal {
            sqlx::query(
                r#"
                UPDATE query_task_sqls
                SET completed_dbs = ?, failed_dbs = ?, completed_at = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(completed_dbs)
            .bind(failed_dbs)
            .bind(Utc::now())
            .bind(Utc::now())
            .bind(id)
            .execute(&mut **tx)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE query_task_sqls
                SET completed_dbs = ?, failed_dbs = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(completed_dbs)
            .bind(failed_dbs)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}
