//! Batched execution persistence
//!
//! A direct UPDATE per completed execution would serialize every worker on
//! the single-writer local store. Workers instead enqueue completed
//! executions onto a channel drained by one background task that coalesces
//! writes: a batch is flushed when it reaches 100 rows or after one second,
//! whichever comes first, in a single transaction.
//!
//! A store failure is logged and the batch is dropped; counters may drift
//! in that case (documented limitation).

use sqlfan_shared::models::TaskExecution;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Maximum rows per flush
const BATCH_SIZE: usize = 100;

/// Maximum time a row waits before being flushed
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Spawns the persistence writer.
///
/// Returns the sender side of the queue and the writer's join handle. Drop
/// every sender to stop the writer; it flushes the residue before exiting,
/// so awaiting the handle guarantees the queue has drained.
pub fn spawn_writer(pool: SqlitePool) -> (mpsc::Sender<TaskExecution>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<TaskExecution>(BATCH_SIZE * 4);

    let handle = tokio::spawn(async move {
        let mut batch: Vec<TaskExecution> = Vec::with_capacity(BATCH_SIZE);
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let remaining = BATCH_SIZE - batch.len();
            tokio::select! {
                received = rx.recv_many(&mut batch, remaining) => {
                    if received == 0 {
                        // all senders dropped
                        flush(&pool, &mut batch).await;
                        break;
                    }
                    if batch.len() >= BATCH_SIZE {
                        flush(&pool, &mut batch).await;
                    }
                }
                _ = ticker.tick() => {
                    flush(&pool, &mut batch).await;
                }
            }
        }
    });

    (tx, handle)
}

/// Writes one batch in a single transaction.
async fn flush(pool: &SqlitePool, batch: &mut Vec<TaskExecution>) {
    if batch.is_empty() {
        return;
    }

    let count = batch.len();
    let result = async {
        let mut tx = pool.begin().await?;
        for execution in batch.iter() {
            TaskExecution::apply_terminal(&mut tx, execution).await?;
        }
        tx.commit().await
    }
    .await;

    match result {
        Ok(()) => debug!(count, "Persisted execution batch"),
        Err(e) => error!(count, error = %e, "Failed to persist execution batch"),
    }

    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlfan_shared::db::store::open_memory_store;
    use sqlfan_shared::models::ExecutionStatus;

    async fn seed_execution(pool: &SqlitePool) -> TaskExecution {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO query_task_executions
                (created_at, updated_at, task_id, sql_id, instance_id,
                 database_name, status, error_message)
            VALUES (?, ?, 1, 1, 1, 'db', 0, '')
            "#,
        )
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();

        sqlx::query_as::<_, TaskExecution>(
            "SELECT * FROM query_task_executions ORDER BY id DESC LIMIT 1",
        )
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_writer_persists_and_drains_on_close() {
        let pool = open_memory_store().await.unwrap();
        let mut execution = seed_execution(&pool).await;

        execution.status = ExecutionStatus::Done.as_i64();
        execution.result_count = Some(3);
        execution.completed_at = Some(Utc::now());

        let (tx, handle) = spawn_writer(pool.clone());
        tx.send(execution.clone()).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let stored = sqlx::query_as::<_, TaskExecution>(
            "SELECT * FROM query_task_executions WHERE id = ?",
        )
        .bind(execution.id)
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(stored.status, ExecutionStatus::Done.as_i64());
        assert_eq!(stored.result_count, Some(3));
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_writer_flushes_on_interval() {
        let pool = open_memory_store().await.unwrap();
        let mut execution = seed_execution(&pool).await;
        execution.status = ExecutionStatus::Failed.as_i64();
        execution.error_message = "sql execution timeout".to_string();
        execution.completed_at = Some(Utc::now());

        let (tx, handle) = spawn_writer(pool.clone());
        tx.send(execution.clone()).await.unwrap();

        // writer still running; the interval flush should land within ~1s
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let stored = sqlx::query_as::<_, TaskExecution>(
            "SELECT * FROM query_task_executions WHERE id = ?",
        )
        .bind(execution.id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed.as_i64());

        drop(tx);
        handle.await.unwrap();
    }
}
