//! Instance model: connection coordinates of a remote MySQL server
//!
//! Instances are created and updated through the API; the task creator, the
//! runner and the scheduler consume them. `sync_interval` drives the
//! interval scheduler: `> 0` means "sync every N minutes", `< 0` encodes a
//! daily fixed time as `-(h*60 + m + 1)`, `0` disables scheduled sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// An extra DSN parameter attached to an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceParam {
    pub key: String,
    pub value: String,
}

/// A registered MySQL server
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Instance {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Unique display name
    pub name: String,

    pub host: String,
    pub port: i64,
    pub username: String,
    pub password: String,

    /// Server version observed on the last successful connection
    pub version: String,

    /// Extra DSN parameters, JSON array of `{key, value}` pairs
    pub params: String,

    pub remark: String,

    /// Scheduled sync interval in minutes; 0 disables, negative encodes a
    /// daily fixed time
    pub sync_interval: i64,

    /// When the scheduler last ran a sync for this instance
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Input for creating or updating an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertInstance {
    pub name: String,
    pub host: String,
    pub port: i64,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub params: Vec<InstanceParam>,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub sync_interval: i64,
}

impl Instance {
    /// Decodes the stored `params` JSON into an ordered parameter list.
    pub fn params_list(&self) -> Vec<InstanceParam> {
        serde_json::from_str(&self.params).unwrap_or_default()
    }

    pub async fn create(pool: &SqlitePool, data: &UpsertInstance) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        let params = serde_json::to_string(&data.params).unwrap_or_else(|_| "[]".to_string());

        sqlx::query_as::<_, Instance>(
            r#"
            INSERT INTO instances
                (created_at, updated_at, name, host, port, username, password,
                 version, params, remark, sync_interval, last_sync_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, '', ?, ?, ?, NULL)
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(&data.name)
        .bind(&data.host)
        .bind(data.port)
        .bind(&data.username)
        .bind(&data.password)
        .bind(params)
        .bind(&data.remark)
        .bind(data.sync_interval)
        .fetch_one(pool)
        .await
    }

    pub async fn update(
        pool: &SqlitePool,
        id: i64,
        data: &UpsertInstance,
    ) -> Result<Option<Self>, sqlx::Error> {
        let params = serde_json::to_string(&data.params).unwrap_or_else(|_| "[]".to_string());

        sqlx::query_as::<_, Instance>(
            r#"
            UPDATE instances
            SET name = ?, host = ?, port = ?, username = ?, password = ?,
                params = ?, remark = ?, sync_interval = ?, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&data.name)
        .bind(&data.host)
        .bind(data.port)
        .bind(&data.username)
        .bind(&data.password)
        .bind(params)
        .bind(&data.remark)
        .bind(data.sync_interval)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Instance>("SELECT * FROM instances WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Instance>("SELECT * FROM instances WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await
    }

    /// Batch lookup used when filling instance names into target sets.
    pub async fn find_by_ids(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<Self>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT * FROM instances WHERE id IN ({})", placeholders);

        let mut query = sqlx::query_as::<_, Instance>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query.fetch_all(pool).await
    }

    pub async fn list(
        pool: &SqlitePool,
        name_filter: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<Self>), sqlx::Error> {
        let pattern = name_filter.map(|n| format!("%{}%", n));

        let (total,): (i64,) = match &pattern {
            Some(p) => {
                sqlx::query_as("SELECT COUNT(*) FROM instances WHERE name LIKE ?")
                    .bind(p)
                    .fetch_one(pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM instances")
                    .fetch_one(pool)
                    .await?
            }
        };

        let items = match &pattern {
            Some(p) => {
                sqlx::query_as::<_, Instance>(
                    "SELECT * FROM instances WHERE name LIKE ? ORDER BY id DESC LIMIT ? OFFSET ?",
                )
                .bind(p)
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Instance>(
                    "SELECT * FROM instances ORDER BY id DESC LIMIT ? OFFSET ?",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?
            }
        };

        Ok((total, items))
    }

    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Instance>("SELECT * FROM instances ORDER BY id ASC")
            .fetch_all(pool)
            .await
    }

    /// Instances eligible for scheduled sync.
    pub async fn list_sync_enabled(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Instance>("SELECT * FROM instances WHERE sync_interval != 0")
            .fetch_all(pool)
            .await
    }

    /// Deletes an instance and its observed databases.
    ///
    /// Task snapshots keep their copy of the instance name; executions
    /// against a deleted instance fail at run time instead.
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM databases WHERE instance_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM instances WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_version(pool: &SqlitePool, id: i64, version: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE instances SET version = ?, updated_at = ? WHERE id = ?")
            .bind(version)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Stamps the scheduler's last-sync marker, success or not.
    pub async fn touch_last_sync(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE instances SET last_sync_at = ?, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM instances")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_list_decodes() {
        let inst = Instance {
            id: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            name: "primary".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: "secret".to_string(),
            version: String::new(),
            params: r#"[{"key":"connectTimeout","value":"5s"}]"#.to_string(),
            remark: String::new(),
            sync_interval: 0,
            last_sync_at: None,
        };

        let params = inst.params_list();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].key, "connectTimeout");
    }

    #[test]
    fn test_params_list_tolerates_garbage() {
        let inst = Instance {
            id: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            name: "x".to_string(),
            host: "h".to_string(),
            port: 3306,
            username: "u".to_string(),
            password: "p".to_string(),
            version: String::new(),
            params: "not json".to_string(),
            remark: String::new(),
            sync_interval: 0,
            last_sync_at: None,
        };
        assert!(inst.params_list().is_empty());
    }
}
