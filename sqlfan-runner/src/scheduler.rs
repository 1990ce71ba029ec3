//! Interval scheduler
//!
//! A single process-wide timer fires every 60 seconds and evaluates two job
//! families against their last-run timestamps:
//!
//! - instance sync jobs: every instance with `sync_interval != 0`
//! - doc jobs: every enabled doc task with `sync_interval != 0`
//!
//! Each due job is dispatched as an independent concurrent task; the
//! scheduler never blocks on a job and ticks may overlap with jobs still
//! running. On completion the last-run marker is stamped irrespective of
//! success; failures are logged only.
//!
//! # Interval encoding
//!
//! | `interval` | Meaning |
//! |---|---|
//! | `> 0` | every N minutes |
//! | `< 0` | daily at a fixed time, encoded `-(h*60 + m + 1)` |
//! | `0` | disabled |
//!
//! Shutdown is cooperative: cancelling the token stops the tick,
//! outstanding dispatched jobs continue to completion.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, TimeZone};
use sqlfan_shared::models::{DocTask, Instance};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::sync;

/// Tick period of the scheduler
const TICK_PERIOD: Duration = Duration::from_secs(60);

/// Executes the body of a doc job.
///
/// Document generation itself is outside the scheduler's concern; the
/// default handler only logs. Deployments plug their generator in here.
#[async_trait]
pub trait DocJobHandler: Send + Sync {
    async fn run(&self, task: &DocTask) -> anyhow::Result<()>;
}

/// Default doc-job handler: logs the trigger and succeeds.
pub struct LogOnlyDocJob;

#[async_trait]
impl DocJobHandler for LogOnlyDocJob {
    async fn run(&self, task: &DocTask) -> anyhow::Result<()> {
        info!(
            doc_task_id = task.id,
            instance_id = task.instance_id,
            database = %task.database_name,
            "Doc job triggered"
        );
        Ok(())
    }
}

/// The process-wide interval scheduler
pub struct IntervalScheduler {
    pool: SqlitePool,
    doc_handler: Arc<dyn DocJobHandler>,
    shutdown: CancellationToken,
}

impl IntervalScheduler {
    pub fn new(pool: SqlitePool, doc_handler: Arc<dyn DocJobHandler>) -> Self {
        IntervalScheduler {
            pool,
            doc_handler,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token used to stop the tick from shutdown handlers.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Starts the tick loop on its own task.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Interval scheduler started");
            let mut ticker = tokio::time::interval(TICK_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first tick of a tokio interval fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.tick().await,
                    _ = self.shutdown.cancelled() => {
                        info!("Interval scheduler stopped");
                        break;
                    }
                }
            }
        })
    }

    /// One evaluation pass over both job families.
    async fn tick(&self) {
        let now = Local::now();

        match Instance::list_sync_enabled(&self.pool).await {
            Ok(instances) => {
                for instance in instances {
                    let last = instance.last_sync_at.map(|t| t.with_timezone(&Local));
                    if is_due(instance.sync_interval, last, now) {
                        self.dispatch_sync(instance);
                    }
                }
            }
            Err(e) => error!(error = %e, "Failed to load instances for scheduled sync"),
        }

        match DocTask::list_enabled(&self.pool).await {
            Ok(tasks) => {
                for task in tasks {
                    let last = task.last_doc_at.map(|t| t.with_timezone(&Local));
                    if is_due(task.sync_interval, last, now) {
                        self.dispatch_doc(task);
                    }
                }
            }
            Err(e) => error!(error = %e, "Failed to load doc tasks for scheduling"),
        }
    }

    fn dispatch_sync(&self, instance: Instance) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let instance_id = instance.id;
            if let Err(e) = sync::sync_instance(&pool, &instance).await {
                warn!(
                    instance_id,
                    instance = %instance.name,
                    error = %e,
                    "Scheduled sync failed"
                );
            }
            // stamped irrespective of success
            if let Err(e) = Instance::touch_last_sync(&pool, instance_id).await {
                error!(instance_id, error = %e, "Failed to stamp last_sync_at");
            }
        });
    }

    fn dispatch_doc(&self, task: DocTask) {
        let pool = self.pool.clone();
        let handler = self.doc_handler.clone();
        tokio::spawn(async move {
            let task_id = task.id;
            if let Err(e) = handler.run(&task).await {
                warn!(doc_task_id = task_id, error = %e, "Doc job failed");
            }
            if let Err(e) = DocTask::touch_last_doc(&pool, task_id).await {
                error!(doc_task_id = task_id, error = %e, "Failed to stamp last_doc_at");
            }
        });
    }
}

/// Decides whether an interval-driven job is due.
///
/// Positive intervals mean "every N minutes". Negative intervals encode a
/// daily fixed time `-(h*60 + m + 1)`: due once today's HH:MM has passed
/// and the job has not run since.
pub fn is_due(interval: i64, last_run_at: Option<DateTime<Local>>, now: DateTime<Local>) -> bool {
    if interval == 0 {
        return false;
    }

    if interval > 0 {
        return match last_run_at {
            None => true,
            Some(last) => last + ChronoDuration::minutes(interval) < now,
        };
    }

    // daily fixed time
    let total_minutes = -interval - 1;
    let hour = (total_minutes / 60) as u32;
    let minute = (total_minutes % 60) as u32;
    if hour > 23 || minute > 59 {
        return false;
    }

    let today_at = match Local.with_ymd_and_hms(
        now.date_naive().year(),
        now.date_naive().month(),
        now.date_naive().day(),
        hour,
        minute,
        0,
    ) {
        chrono::LocalResult::Single(t) => t,
        _ => return false,
    };

    if now < today_at {
        return false;
    }

    match last_run_at {
        None => true,
        Some(last) => last < today_at,
    }
}
