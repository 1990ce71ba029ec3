//! Database model: a schema observed on an instance
//!
//! Rows are rebuilt wholesale on each sync of the parent instance (hard
//! delete + reinsert). Tasks snapshot their targets at creation, so a later
//! sync never mutates an existing task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// A database observed on a registered instance
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Database {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub instance_id: i64,
    pub name: String,
    pub character_set: String,
    pub collation: String,

    /// Data + index size in bytes, as reported by information_schema
    pub size: i64,
    pub table_count: i64,
}

/// Freshly observed schema facts used when rebuilding an instance's rows
#[derive(Debug, Clone)]
pub struct ObservedDatabase {
    pub name: String,
    pub character_set: String,
    pub collation: String,
    pub size: i64,
    pub table_count: i64,
}

impl Database {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Database>("SELECT * FROM databases WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(
        pool: &SqlitePool,
        instance_id: Option<i64>,
        name_filter: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<Self>), sqlx::Error> {
        let mut conditions = Vec::new();
        if instance_id.is_some() {
            conditions.push("instance_id = ?");
        }
        if name_filter.is_some() {
            conditions.push("name LIKE ?");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let pattern = name_filter.map(|n| format!("%{}%", n));

        let count_sql = format!("SELECT COUNT(*) FROM databases{}", where_clause);
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        if let Some(id) = instance_id {
            count_query = count_query.bind(id);
        }
        if let Some(p) = &pattern {
            count_query = count_query.bind(p);
        }
        let (total,) = count_query.fetch_one(pool).await?;

        let list_sql = format!(
            "SELECT * FROM databases{} ORDER BY instance_id ASC, name ASC LIMIT ? OFFSET ?",
            where_clause
        );
        let mut list_query = sqlx::query_as::<_, Database>(&list_sql);
        if let Some(id) = instance_id {
            list_query = list_query.bind(id);
        }
        if let Some(p) = &pattern {
            list_query = list_query.bind(p);
        }
        let items = list_query.bind(limit).bind(offset).fetch_all(pool).await?;

        Ok((total, items))
    }

    /// All databases across a set of instances, for exclude-mode expansion
    /// and batch listings.
    pub async fn list_by_instances(
        pool: &SqlitePool,
        instance_ids: &[i64],
    ) -> Result<Vec<Self>, sqlx::Error> {
        if instance_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; instance_ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM databases WHERE instance_id IN ({}) ORDER BY instance_id ASC, name ASC",
            placeholders
        );

        let mut query = sqlx::query_as::<_, Database>(&sql);
        for id in instance_ids {
            query = query.bind(id);
        }
        query.fetch_all(pool).await
    }

    /// Replaces an instance's observed databases wholesale, in one
    /// transaction.
    pub async fn replace_for_instance(
        pool: &SqlitePool,
        instance_id: i64,
        observed: &[ObservedDatabase],
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM databases WHERE instance_id = ?")
            .bind(instance_id)
            .execute(&mut *tx)
            .await?;

        for db in observed {
            sqlx::query(
                r#"
                INSERT INTO databases
                    (created_at, updated_at, instance_id, name, character_set,
                     collation, size, table_count)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(instance_id)
            .bind(&db.name)
            .bind(&db.character_set)
            .bind(&db.collation)
            .bind(db.size)
            .bind(db.table_count)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM databases")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}
