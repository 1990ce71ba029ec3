//! Config model: key/value rows backing the config cache

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// One configuration entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConfigEntry {
    pub c_key: String,
    pub c_value: String,
}

impl ConfigEntry {
    pub async fn find(pool: &SqlitePool, key: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ConfigEntry>("SELECT c_key, c_value FROM configs WHERE c_key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await
    }

    pub async fn upsert(pool: &SqlitePool, key: &str, value: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO configs (c_key, c_value) VALUES (?, ?)
            ON CONFLICT (c_key) DO UPDATE SET c_value = excluded.c_value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_many(pool: &SqlitePool, keys: &[String]) -> Result<Vec<Self>, sqlx::Error> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "SELECT c_key, c_value FROM configs WHERE c_key IN ({})",
            placeholders
        );
        let mut query = sqlx::query_as::<_, ConfigEntry>(&sql);
        for key in keys {
            query = query.bind(key);
        }
        query.fetch_all(pool).await
    }
}
