//! End-to-end task lifecycle tests against an in-memory store
//!
//! Target MySQL servers are not available in unit CI, so the run-path tests
//! drive the engine through targets whose instances do not exist: every
//! execution fails with "instance not found", which exercises the full
//! pipeline — permits, status channel, persistence queue, aggregation —
//! without the network.

use sqlfan_runner::creator::{CreateTaskError, CreateTaskRequest, TaskCreator};
use sqlfan_runner::runner::{RunnerError, TaskRunner};
use sqlfan_runner::service;
use sqlfan_shared::config_cache::ConfigCache;
use sqlfan_shared::db::store::open_memory_store;
use sqlfan_shared::models::{
    instance::UpsertInstance, Database, ExecutionStatus, Instance, ObservedDatabase, Pagination,
    Sorting, Task, TaskDatabase, TaskExecution, TaskSql, TaskStatus,
};
use sqlx::SqlitePool;
use std::sync::Arc;

async fn store() -> SqlitePool {
    open_memory_store().await.unwrap()
}

async fn seed_instance(pool: &SqlitePool, name: &str) -> Instance {
    Instance::create(
        pool,
        &UpsertInstance {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: "root".to_string(),
            params: vec![],
            remark: String::new(),
            sync_interval: 0,
        },
    )
    .await
    .unwrap()
}

fn target(instance_id: i64, database_name: &str) -> TaskDatabase {
    TaskDatabase {
        instance_id,
        database_name: database_name.to_string(),
        instance_name: String::new(),
    }
}

fn request(name: &str, mode: &str, targets: Vec<TaskDatabase>, sql: &str) -> CreateTaskRequest {
    CreateTaskRequest {
        task_name: name.to_string(),
        description: String::new(),
        instance_ids: vec![],
        database_mode: mode.to_string(),
        selected_dbs: targets,
        sql_content: sql.to_string(),
    }
}

#[tokio::test]
async fn test_create_include_mode_fills_instance_names() {
    let pool = store().await;
    let alpha = seed_instance(&pool, "alpha").await;
    let beta = seed_instance(&pool, "beta").await;

    let creator = TaskCreator::new(pool.clone());
    let task = creator
        .create(&request(
            "audit",
            "include",
            vec![
                target(alpha.id, "a"),
                target(alpha.id, "b"),
                target(beta.id, "c"),
            ],
            "SELECT 1 AS one; SELECT 2 AS two;",
        ))
        .await
        .unwrap();

    assert_eq!(task.total_dbs, 3);
    assert_eq!(task.total_sqls, 2);
    assert_eq!(task.status, TaskStatus::Pending.as_i64());

    let targets = task.target_databases();
    assert_eq!(targets.len(), 3);
    assert_eq!(targets[0].instance_name, "alpha");
    assert_eq!(targets[2].instance_name, "beta");

    let sqls = TaskSql::list_for_task(&pool, task.id).await.unwrap();
    assert_eq!(sqls.len(), 2);
    assert_eq!(sqls[0].sql_order, 1);
    assert_eq!(sqls[0].result_table_name, format!("task_{}_sql_1_result", task.id));
    assert_eq!(sqls[0].total_dbs, 3);

    // five system fields plus the detected header
    assert_eq!(sqls[0].schema().fields.len(), 6);
    assert_eq!(sqls[0].schema().fields[5].name, "one");

    let executions = TaskExecution::list_for_task(&pool, task.id).await.unwrap();
    assert_eq!(executions.len(), 6);
    assert!(executions
        .iter()
        .all(|e| e.status == ExecutionStatus::Pending.as_i64()));

    // the result tables exist and are empty
    for sql in &sqls {
        let (count,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM \"{}\"", sql.result_table_name))
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 0);
    }
}

#[tokio::test]
async fn test_create_missing_instance_gets_synthetic_name() {
    let pool = store().await;
    let creator = TaskCreator::new(pool.clone());

    let task = creator
        .create(&request(
            "ghost",
            "include",
            vec![target(42, "a")],
            "SELECT 1;",
        ))
        .await
        .unwrap();

    assert_eq!(task.target_databases()[0].instance_name, "instance42");
}

#[tokio::test]
async fn test_create_exclude_mode_subtracts_selection() {
    let pool = store().await;
    let one = seed_instance(&pool, "one").await;
    let two = seed_instance(&pool, "two").await;

    let observe = |name: &str| ObservedDatabase {
        name: name.to_string(),
        character_set: "utf8mb4".to_string(),
        collation: "utf8mb4_general_ci".to_string(),
        size: 0,
        table_count: 0,
    };
    Database::replace_for_instance(&pool, one.id, &[observe("a"), observe("b"), observe("c")])
        .await
        .unwrap();
    Database::replace_for_instance(&pool, two.id, &[observe("d")])
        .await
        .unwrap();

    let creator = TaskCreator::new(pool.clone());
    let mut req = request("exclude run", "exclude", vec![target(one.id, "b")], "SELECT 1;");
    req.instance_ids = vec![one.id, two.id];
    let task = creator.create(&req).await.unwrap();

    let mut names: Vec<(i64, String)> = task
        .target_databases()
        .into_iter()
        .map(|t| (t.instance_id, t.database_name))
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            (one.id, "a".to_string()),
            (one.id, "c".to_string()),
            (two.id, "d".to_string()),
        ]
    );
    assert_eq!(task.total_dbs, 3);
}

#[tokio::test]
async fn test_create_rejects_duplicate_name() {
    let pool = store().await;
    let creator = TaskCreator::new(pool.clone());
    let req = request("dup", "include", vec![target(1, "a")], "SELECT 1;");

    creator.create(&req).await.unwrap();
    match creator.create(&req).await {
        Err(CreateTaskError::DuplicateName(name)) => assert_eq!(name, "dup"),
        other => panic!("expected duplicate-name error, got {:?}", other.map(|t| t.id)),
    }
}

#[tokio::test]
async fn test_create_rejects_empty_batch() {
    let pool = store().await;
    let creator = TaskCreator::new(pool.clone());
    let result = creator
        .create(&request("empty", "include", vec![target(1, "a")], "-- nothing\n"))
        .await;
    assert!(matches!(result, Err(CreateTaskError::EmptyBatch)));
}

#[tokio::test]
async fn test_create_rejects_unknown_mode() {
    let pool = store().await;
    let creator = TaskCreator::new(pool.clone());
    let result = creator
        .create(&request("mode", "everything", vec![], "SELECT 1;"))
        .await;
    assert!(matches!(result, Err(CreateTaskError::InvalidMode(_))));
}

#[tokio::test]
async fn test_run_without_executions_marks_done() {
    let pool = store().await;
    let creator = TaskCreator::new(pool.clone());
    let task = creator
        .create(&request("no targets", "include", vec![], "SELECT 1;"))
        .await
        .unwrap();

    let runner = TaskRunner::new(pool.clone(), Arc::new(ConfigCache::new(pool.clone())));
    runner.run(task.id).await.unwrap();

    let task = Task::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done.as_i64());
    assert!(task.completed_at.is_some());
}

#[tokio::test]
async fn test_run_unknown_task_is_catastrophic() {
    let pool = store().await;
    let runner = TaskRunner::new(pool.clone(), Arc::new(ConfigCache::new(pool.clone())));
    assert!(matches!(
        runner.run(123456).await,
        Err(RunnerError::TaskNotFound(123456))
    ));
}

/// Full fan-out pass: 2 statements × 3 targets whose instances are gone.
/// Every execution must fail terminally and the roll-up must follow the
/// completed/failed rules.
#[tokio::test]
async fn test_run_rolls_up_missing_instance_failures() {
    let pool = store().await;
    let creator = TaskCreator::new(pool.clone());
    let task = creator
        .create(&request(
            "doomed",
            "include",
            vec![target(901, "a"), target(901, "b"), target(902, "c")],
            "SELECT 1 AS x; SELECT 2 AS y;",
        ))
        .await
        .unwrap();

    Task::set_status(&pool, task.id, TaskStatus::Running).await.unwrap();
    let runner = TaskRunner::new(pool.clone(), Arc::new(ConfigCache::new(pool.clone())));
    runner.run(task.id).await.unwrap();

    let task = Task::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done.as_i64());
    assert_eq!(task.total_dbs, 3);
    assert_eq!(task.completed_dbs, 0);
    assert_eq!(task.failed_dbs, 3);
    assert_eq!(task.completed_sqls, 0);
    assert_eq!(task.failed_sqls, 2);
    assert!(task.started_at.is_some());
    assert!(task.completed_at.is_some());

    let executions = TaskExecution::list_for_task(&pool, task.id).await.unwrap();
    assert_eq!(executions.len(), 6);
    for execution in &executions {
        assert_eq!(execution.status, ExecutionStatus::Failed.as_i64());
        assert_eq!(execution.error_message, "instance not found");
        assert!(execution.completed_at.is_some());
        assert!(execution.execution_time.is_some());
    }

    let sqls = TaskSql::list_for_task(&pool, task.id).await.unwrap();
    for sql in &sqls {
        assert_eq!(sql.completed_dbs, 0);
        assert_eq!(sql.failed_dbs, 3);
        assert!(sql.started_at.is_some());
        assert!(sql.completed_at.is_some());
    }
}

#[tokio::test]
async fn test_execution_stats_views() {
    let pool = store().await;
    let creator = TaskCreator::new(pool.clone());
    let task = creator
        .create(&request(
            "stats",
            "include",
            vec![target(901, "a"), target(902, "b")],
            "SELECT 1;",
        ))
        .await
        .unwrap();

    let stats = service::get_execution_stats(&pool, task.id).await.unwrap();
    assert_eq!(stats.db.total, 2);
    assert_eq!(stats.db.pending, 2);
    assert_eq!(stats.sql.total, 1);
    assert_eq!(stats.sql.pending, 1);

    let runner = TaskRunner::new(pool.clone(), Arc::new(ConfigCache::new(pool.clone())));
    runner.run(task.id).await.unwrap();

    let stats = service::get_execution_stats(&pool, task.id).await.unwrap();
    assert_eq!(stats.db.failed, 2);
    assert_eq!(stats.db.pending, 0);
    assert_eq!(stats.sql.failed, 1);
}

#[tokio::test]
async fn test_reset_then_rerun() {
    let pool = store().await;
    let creator = TaskCreator::new(pool.clone());
    let task = creator
        .create(&request(
            "retryable",
            "include",
            vec![target(77, "a")],
            "SELECT 1;",
        ))
        .await
        .unwrap();

    let runner = TaskRunner::new(pool.clone(), Arc::new(ConfigCache::new(pool.clone())));
    runner.run(task.id).await.unwrap();

    // a running task must not be resettable
    Task::set_status(&pool, task.id, TaskStatus::Running).await.unwrap();
    assert!(!service::reset_task(&pool, task.id).await.unwrap());
    Task::set_status(&pool, task.id, TaskStatus::Done).await.unwrap();

    assert!(service::reset_task(&pool, task.id).await.unwrap());

    let task_row = Task::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(task_row.status, TaskStatus::Pending.as_i64());
    assert_eq!(task_row.failed_dbs, 0);
    assert!(task_row.started_at.is_none());
    assert!(task_row.completed_at.is_none());

    let executions = TaskExecution::list_for_task(&pool, task.id).await.unwrap();
    for execution in &executions {
        assert_eq!(execution.status, ExecutionStatus::Pending.as_i64());
        assert!(execution.error_message.is_empty());
        assert!(execution.completed_at.is_none());
        assert!(execution.result_count.is_none());
    }

    // result table survives the reset, empty
    let sqls = TaskSql::list_for_task(&pool, task.id).await.unwrap();
    let (count,): (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM \"{}\"",
        sqls[0].result_table_name
    ))
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count, 0);

    // the reset task runs again
    runner.run(task.id).await.unwrap();
    let task_row = Task::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(task_row.status, TaskStatus::Done.as_i64());
    assert_eq!(task_row.failed_dbs, 1);
}

#[tokio::test]
async fn test_batch_delete_drops_result_tables() {
    let pool = store().await;
    let creator = TaskCreator::new(pool.clone());
    let keep = creator
        .create(&request("keep", "include", vec![target(1, "a")], "SELECT 1;"))
        .await
        .unwrap();
    let drop_me = creator
        .create(&request("drop me", "include", vec![target(1, "a")], "SELECT 1;"))
        .await
        .unwrap();

    let doomed_table = TaskSql::list_for_task(&pool, drop_me.id).await.unwrap()[0]
        .result_table_name
        .clone();

    service::batch_delete_tasks(&pool, &[drop_me.id]).await.unwrap();

    assert!(Task::find_by_id(&pool, drop_me.id).await.unwrap().is_none());
    assert!(TaskSql::list_for_task(&pool, drop_me.id).await.unwrap().is_empty());
    assert!(TaskExecution::list_for_task(&pool, drop_me.id)
        .await
        .unwrap()
        .is_empty());

    // table is gone
    let gone: Result<(i64,), _> =
        sqlx::query_as(&format!("SELECT COUNT(*) FROM \"{}\"", doomed_table))
            .fetch_one(&pool)
            .await;
    assert!(gone.is_err());

    // unrelated task untouched
    assert!(Task::find_by_id(&pool, keep.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_get_sqls_with_executions_composes_layers() {
    let pool = store().await;
    let alpha = seed_instance(&pool, "alpha").await;
    let creator = TaskCreator::new(pool.clone());
    let task = creator
        .create(&request(
            "layers",
            "include",
            vec![target(alpha.id, "a"), target(alpha.id, "b")],
            "SELECT 1; SELECT 2;",
        ))
        .await
        .unwrap();

    let detail = service::get_sqls_with_executions(&pool, task.id).await.unwrap();
    assert_eq!(detail.len(), 2);
    assert_eq!(detail[0].sql_order, 1);
    assert_eq!(detail[0].executions.len(), 2);
    assert_eq!(detail[0].executions[0].instance_name, "alpha");
}

#[tokio::test]
async fn test_get_sql_result_decodes_columns() {
    let pool = store().await;
    let creator = TaskCreator::new(pool.clone());
    let task = creator
        .create(&request(
            "results",
            "include",
            vec![target(5, "a")],
            "SELECT a AS 名称 FROM t;",
        ))
        .await
        .unwrap();

    let sql = TaskSql::list_for_task(&pool, task.id).await.unwrap().remove(0);

    let page = service::get_sql_result(
        &pool,
        sql.id,
        &[("名称".to_string(), "x".to_string())],
        &Sorting {
            sort_field: Some("名称".to_string()),
            sort_order: Some("asc".to_string()),
        },
        Pagination::default(),
    )
    .await
    .unwrap();

    assert_eq!(page.total, 0);
    assert!(page.columns.contains(&"名称".to_string()));
    assert!(page.rows.is_empty());
}

#[tokio::test]
async fn test_get_sql_result_rejects_unknown_sort() {
    let pool = store().await;
    let creator = TaskCreator::new(pool.clone());
    let task = creator
        .create(&request("badsort", "include", vec![target(5, "a")], "SELECT 1 AS n;"))
        .await
        .unwrap();
    let sql = TaskSql::list_for_task(&pool, task.id).await.unwrap().remove(0);

    let result = service::get_sql_result(
        &pool,
        sql.id,
        &[],
        &Sorting {
            sort_field: Some("nope".to_string()),
            sort_order: None,
        },
        Pagination::default(),
    )
    .await;
    assert!(matches!(result, Err(service::ServiceError::UnknownSortColumn(_))));
}

#[tokio::test]
async fn test_list_tasks_filters_and_sorts() {
    let pool = store().await;
    let creator = TaskCreator::new(pool.clone());
    creator
        .create(&request("alpha task", "include", vec![target(1, "a")], "SELECT 1;"))
        .await
        .unwrap();
    let favored = creator
        .create(&request("beta task", "include", vec![target(1, "a")], "SELECT 1;"))
        .await
        .unwrap();

    Task::toggle_favorite(&pool, favored.id).await.unwrap();

    let (total, items) = service::list_tasks(
        &pool,
        service::TaskListFilter {
            task_name: Some("beta".to_string()),
            is_favorite: Some(true),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(total, 1);
    assert_eq!(items[0].task_name, "beta task");

    let err = service::list_tasks(
        &pool,
        service::TaskListFilter {
            sorting: Sorting {
                sort_field: Some("password".to_string()),
                sort_order: None,
            },
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(err, Err(service::ServiceError::UnknownSortColumn(_))));
}
