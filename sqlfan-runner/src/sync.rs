//! Instance database synchronization
//!
//! Rebuilds an instance's observed databases from `information_schema`:
//! schema names, character sets, collations, and per-schema size and table
//! counts. Rows are replaced wholesale (hard delete + reinsert); tasks keep
//! their own snapshot, so a sync never mutates existing tasks.

use sqlfan_shared::db::target;
use sqlfan_shared::models::{Database, Instance, ObservedDatabase};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::info;

/// Schemas that never become sync targets
const SYSTEM_SCHEMAS: [&str; 4] = ["information_schema", "mysql", "performance_schema", "sys"];

/// Synchronizes one instance's database list into the local store.
///
/// Also stamps the server version observed on the connection. Does not
/// touch `last_sync_at`; the scheduler owns that marker.
pub async fn sync_instance(pool: &SqlitePool, instance: &Instance) -> anyhow::Result<()> {
    let target = target::connect(instance, "information_schema", 2).await?;

    let result = collect(&target).await;
    target.close().await;
    let (version, observed) = result?;

    Database::replace_for_instance(pool, instance.id, &observed).await?;
    Instance::set_version(pool, instance.id, &version).await?;

    info!(
        instance_id = instance.id,
        instance = %instance.name,
        databases = observed.len(),
        "Instance databases synchronized"
    );
    Ok(())
}

/// Synchronizes several instances; an instance failure is reported but does
/// not stop the rest.
pub async fn sync_instances(pool: &SqlitePool, instance_ids: &[i64]) -> anyhow::Result<Vec<String>> {
    let mut errors = Vec::new();
    for &id in instance_ids {
        let instance = match Instance::find_by_id(pool, id).await? {
            Some(instance) => instance,
            None => {
                errors.push(format!("instance {} not found", id));
                continue;
            }
        };
        if let Err(e) = sync_instance(pool, &instance).await {
            errors.push(format!("{}: {}", instance.name, e));
        }
    }
    Ok(errors)
}

async fn collect(
    target: &sqlx::MySqlPool,
) -> anyhow::Result<(String, Vec<ObservedDatabase>)> {
    let (version,): (String,) = sqlx::query_as("SELECT VERSION()").fetch_one(target).await?;

    let schemata = sqlx::query(
        r#"
        SELECT SCHEMA_NAME, DEFAULT_CHARACTER_SET_NAME, DEFAULT_COLLATION_NAME
        FROM information_schema.SCHEMATA
        "#,
    )
    .fetch_all(target)
    .await?;

    let sizes = sqlx::query(
        r#"
        SELECT TABLE_SCHEMA,
               COUNT(*) AS table_count,
               CAST(COALESCE(SUM(DATA_LENGTH + INDEX_LENGTH), 0) AS SIGNED) AS total_size
        FROM information_schema.TABLES
        GROUP BY TABLE_SCHEMA
        "#,
    )
    .fetch_all(target)
    .await?;

    let mut size_map: HashMap<String, (i64, i64)> = HashMap::new();
    for row in &sizes {
        let schema: String = row.try_get("TABLE_SCHEMA")?;
        let table_count: i64 = row.try_get("table_count")?;
        let total_size: i64 = row.try_get::<Option<i64>, _>("total_size")?.unwrap_or(0);
        size_map.insert(schema, (table_count, total_size));
    }

    let mut observed = Vec::new();
    for row in &schemata {
        let name: String = row.try_get("SCHEMA_NAME")?;
        if SYSTEM_SCHEMAS.contains(&name.as_str()) {
            continue;
        }
        let character_set: String = row
            .try_get::<Option<String>, _>("DEFAULT_CHARACTER_SET_NAME")?
            .unwrap_or_else(|| "utf8mb4".to_string());
        let collation: String = row
            .try_get::<Option<String>, _>("DEFAULT_COLLATION_NAME")?
            .unwrap_or_else(|| "utf8mb4_general_ci".to_string());

        let (table_count, size) = size_map.get(&name).copied().unwrap_or((0, 0));
        observed.push(ObservedDatabase {
            name,
            character_set,
            collation,
            size,
            table_count,
        });
    }

    Ok((version, observed))
}

/// Probes connectivity to an instance and returns the server version.
pub async fn test_connection(instance: &Instance) -> anyhow::Result<String> {
    let target = target::connect(instance, "information_schema", 1).await?;
    let result: Result<(String,), sqlx::Error> =
        sqlx::query_as("SELECT VERSION()").fetch_one(&target).await;
    target.close().await;
    Ok(result?.0)
}
