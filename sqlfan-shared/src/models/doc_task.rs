//! DocTask model: an interval-driven documentation job
//!
//! Doc tasks name an `(instance, database)` pair whose documentation should
//! be regenerated periodically. The scheduler decides when a task is due
//! (same interval rules as instance sync); executing the job body is
//! delegated to a pluggable handler, and the manual run endpoint reuses the
//! same handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// A scheduled database-documentation job
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DocTask {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub task_name: String,

    pub instance_id: i64,
    pub database_name: String,

    pub is_enable: bool,

    /// Minutes between runs; 0 disables, negative encodes a daily fixed time
    pub sync_interval: i64,

    pub last_doc_at: Option<DateTime<Utc>>,
}

/// Input for creating or updating a doc task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertDocTask {
    pub task_name: String,
    pub instance_id: i64,
    pub database_name: String,
    #[serde(default)]
    pub is_enable: bool,
    #[serde(default)]
    pub sync_interval: i64,
}

impl DocTask {
    pub async fn create(pool: &SqlitePool, data: &UpsertDocTask) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, DocTask>(
            r#"
            INSERT INTO db_doc_tasks
                (created_at, updated_at, task_name, instance_id, database_name,
                 is_enable, sync_interval, last_doc_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(&data.task_name)
        .bind(data.instance_id)
        .bind(&data.database_name)
        .bind(data.is_enable)
        .bind(data.sync_interval)
        .fetch_one(pool)
        .await
    }

    pub async fn update(
        pool: &SqlitePool,
        id: i64,
        data: &UpsertDocTask,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, DocTask>(
            r#"
            UPDATE db_doc_tasks
            SET task_name = ?, instance_id = ?, database_name = ?,
                is_enable = ?, sync_interval = ?, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&data.task_name)
        .bind(data.instance_id)
        .bind(&data.database_name)
        .bind(data.is_enable)
        .bind(data.sync_interval)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, DocTask>("SELECT * FROM db_doc_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(
        pool: &SqlitePool,
        name_filter: Option<&str>,
        instance_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<Self>), sqlx::Error> {
        let mut conditions = Vec::new();
        if name_filter.is_some() {
            conditions.push("task_name LIKE ?");
        }
        if instance_id.is_some() {
            conditions.push("instance_id = ?");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let pattern = name_filter.map(|n| format!("%{}%", n));

        let count_sql = format!("SELECT COUNT(*) FROM db_doc_tasks{}", where_clause);
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        if let Some(p) = &pattern {
            count_query = count_query.bind(p);
        }
        if let Some(id) = instance_id {
            count_query = count_query.bind(id);
        }
        let (total,) = count_query.fetch_one(pool).await?;

        let list_sql = format!(
            "SELECT * FROM db_doc_tasks{} ORDER BY id DESC LIMIT ? OFFSET ?",
            where_clause
        );
        let mut list_query = sqlx::query_as::<_, DocTask>(&list_sql);
        if let Some(p) = &pattern {
            list_query = list_query.bind(p);
        }
        if let Some(id) = instance_id {
            list_query = list_query.bind(id);
        }
        let items = list_query.bind(limit).bind(offset).fetch_all(pool).await?;

        Ok((total, items))
    }

    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM db_doc_tasks WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Doc tasks eligible for scheduling.
    pub async fn list_enabled(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, DocTask>(
            "SELECT * FROM db_doc_tasks WHERE is_enable = 1 AND sync_interval != 0",
        )
        .fetch_all(pool)
        .await
    }

    /// Stamps the last-run marker, success or not.
    pub async fn touch_last_doc(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE db_doc_tasks SET last_doc_at = ?, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
