//! Read-through configuration cache
//!
//! A process-wide key/value cache over the `configs` table. Reads hit the
//! in-memory map first and fall through to the store; writes go to the
//! store and update the map. Recognized runner options carry defaults that
//! apply when a key is missing or unparsable.
//!
//! | Key | Effect | Default |
//! |---|---|---|
//! | `max_conn` | target MySQL pool max idle & open connections | 100 |
//! | `concurrency` | runner-wide parallel worker permits | 50 |
//! | `query_timeout_sec` | per-execution query timeout | 300 |

use crate::models::ConfigEntry;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::warn;

/// Default target-pool connection cap
pub const DEFAULT_MAX_CONN: u32 = 100;

/// Default runner concurrency
pub const DEFAULT_CONCURRENCY: usize = 50;

/// Default per-execution query timeout, seconds
pub const DEFAULT_QUERY_TIMEOUT_SEC: u64 = 300;

/// Recognized keys and their defaults
pub fn default_values() -> Vec<(&'static str, String)> {
    vec![
        ("max_conn", DEFAULT_MAX_CONN.to_string()),
        ("concurrency", DEFAULT_CONCURRENCY.to_string()),
        ("query_timeout_sec", DEFAULT_QUERY_TIMEOUT_SEC.to_string()),
    ]
}

/// Settings consumed by the task runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    pub max_conn: u32,
    pub concurrency: usize,
    pub query_timeout_sec: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        RunnerSettings {
            max_conn: DEFAULT_MAX_CONN,
            concurrency: DEFAULT_CONCURRENCY,
            query_timeout_sec: DEFAULT_QUERY_TIMEOUT_SEC,
        }
    }
}

/// Process-wide read-through configuration cache
pub struct ConfigCache {
    pool: SqlitePool,
    cache: RwLock<HashMap<String, String>>,
}

impl ConfigCache {
    pub fn new(pool: SqlitePool) -> Self {
        ConfigCache {
            pool,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Seeds recognized defaults into the store and primes the cache.
    ///
    /// Existing rows win; only missing keys are written.
    pub async fn init_defaults(&self) -> Result<(), sqlx::Error> {
        for (key, default) in default_values() {
            let value = match ConfigEntry::find(&self.pool, key).await? {
                Some(entry) => entry.c_value,
                None => {
                    ConfigEntry::upsert(&self.pool, key, &default).await?;
                    default
                }
            };
            self.cache
                .write()
                .expect("config cache lock poisoned")
                .insert(key.to_string(), value);
        }
        Ok(())
    }

    /// Gets a value, cache first, store second.
    pub async fn get(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        if let Some(value) = self
            .cache
            .read()
            .expect("config cache lock poisoned")
            .get(key)
        {
            return Ok(Some(value.clone()));
        }

        let entry = ConfigEntry::find(&self.pool, key).await?;
        if let Some(entry) = &entry {
            self.cache
                .write()
                .expect("config cache lock poisoned")
                .insert(entry.c_key.clone(), entry.c_value.clone());
        }
        Ok(entry.map(|e| e.c_value))
    }

    /// Writes a value to the store and the cache.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), sqlx::Error> {
        ConfigEntry::upsert(&self.pool, key, value).await?;
        self.cache
            .write()
            .expect("config cache lock poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Batch read; missing recognized keys are filled from defaults.
    pub async fn batch_get(&self, keys: &[String]) -> Result<Vec<ConfigEntry>, sqlx::Error> {
        let mut entries = ConfigEntry::find_many(&self.pool, keys).await?;

        let defaults: HashMap<&str, String> = default_values().into_iter().collect();
        for key in keys {
            if entries.iter().any(|e| &e.c_key == key) {
                continue;
            }
            if let Some(default) = defaults.get(key.as_str()) {
                entries.push(ConfigEntry {
                    c_key: key.clone(),
                    c_value: default.clone(),
                });
            }
        }

        Ok(entries)
    }

    /// Batch write, one transaction.
    pub async fn batch_set(&self, entries: &[ConfigEntry]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO configs (c_key, c_value) VALUES (?, ?)
                ON CONFLICT (c_key) DO UPDATE SET c_value = excluded.c_value
                "#,
            )
            .bind(&entry.c_key)
            .bind(&entry.c_value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let mut cache = self.cache.write().expect("config cache lock poisoned");
        for entry in entries {
            cache.insert(entry.c_key.clone(), entry.c_value.clone());
        }
        Ok(())
    }

    /// Resolves the runner settings, falling back to defaults on missing or
    /// unparsable values.
    pub async fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            max_conn: self.parsed("max_conn", DEFAULT_MAX_CONN).await,
            concurrency: self.parsed("concurrency", DEFAULT_CONCURRENCY).await,
            query_timeout_sec: self
                .parsed("query_timeout_sec", DEFAULT_QUERY_TIMEOUT_SEC)
                .await,
        }
    }

    async fn parsed<T: std::str::FromStr + Copy>(&self, key: &str, default: T) -> T {
        match self.get(key).await {
            Ok(Some(raw)) => match raw.trim().parse() {
                Ok(value) => value,
                Err(_) => {
                    warn!(key, value = %raw, "Unparsable config value, using default");
                    default
                }
            },
            Ok(None) => default,
            Err(e) => {
                warn!(key, error = %e, "Config lookup failed, using default");
                default
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::open_memory_store;

    #[tokio::test]
    async fn test_init_defaults_then_get() {
        let pool = open_memory_store().await.unwrap();
        let cache = ConfigCache::new(pool);
        cache.init_defaults().await.unwrap();

        assert_eq!(cache.get("max_conn").await.unwrap().as_deref(), Some("100"));
        assert_eq!(
            cache.get("concurrency").await.unwrap().as_deref(),
            Some("50")
        );
    }

    #[tokio::test]
    async fn test_existing_rows_win_over_defaults() {
        let pool = open_memory_store().await.unwrap();
        ConfigEntry::upsert(&pool, "concurrency", "8").await.unwrap();

        let cache = ConfigCache::new(pool);
        cache.init_defaults().await.unwrap();

        let settings = cache.runner_settings().await;
        assert_eq!(settings.concurrency, 8);
    }

    #[tokio::test]
    async fn test_unparsable_value_falls_back() {
        let pool = open_memory_store().await.unwrap();
        let cache = ConfigCache::new(pool);
        cache.set("query_timeout_sec", "soon").await.unwrap();

        let settings = cache.runner_settings().await;
        assert_eq!(settings.query_timeout_sec, DEFAULT_QUERY_TIMEOUT_SEC);
    }

    #[tokio::test]
    async fn test_batch_get_fills_defaults() {
        let pool = open_memory_store().await.unwrap();
        let cache = ConfigCache::new(pool);
        cache.set("max_conn", "25").await.unwrap();

        let entries = cache
            .batch_get(&["max_conn".to_string(), "concurrency".to_string()])
            .await
            .unwrap();

        let get = |k: &str| entries.iter().find(|e| e.c_key == k).unwrap().c_value.clone();
        assert_eq!(get("max_conn"), "25");
        assert_eq!(get("concurrency"), "50");
    }

    #[tokio::test]
    async fn test_set_updates_cache_and_store() {
        let pool = open_memory_store().await.unwrap();
        let cache = ConfigCache::new(pool.clone());
        cache.set("max_conn", "12").await.unwrap();

        assert_eq!(cache.get("max_conn").await.unwrap().as_deref(), Some("12"));
        let entry = ConfigEntry::find(&pool, "max_conn").await.unwrap().unwrap();
        assert_eq!(entry.c_value, "12");
    }
}
