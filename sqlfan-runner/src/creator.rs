//! Task creation
//!
//! Expands a `(instances, include|exclude, selected_dbs)` request into a
//! concrete target set, splits the SQL blob into ordered statements, infers
//! each statement's result schema, provisions one result table per
//! statement and seeds one pending execution per `(statement, target)`.
//!
//! The whole write happens in a single local transaction: a failure at any
//! step leaves no task, no statement rows, no executions and no result
//! tables behind.
//!
//! # Example
//!
//! ```no_run
//! use sqlfan_runner::creator::{CreateTaskRequest, TaskCreator};
//!
//! # async fn example(pool: sqlx::SqlitePool) -> anyhow::Result<()> {
//! let creator = TaskCreator::new(pool);
//! let task = creator
//!     .create(&CreateTaskRequest {
//!         task_name: "inventory audit".to_string(),
//!         description: String::new(),
//!         instance_ids: vec![1],
//!         database_mode: "include".to_string(),
//!         selected_dbs: vec![],
//!         sql_content: "SELECT COUNT(*) AS rows FROM stock;".to_string(),
//!     })
//!     .await?;
//! println!("created task {}", task.id);
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Column, Executor, SqlitePool, Statement};
use sqlfan_shared::db::target;
use sqlfan_shared::ident;
use sqlfan_shared::models::{
    Database, Instance, Task, TaskDatabase, TaskExecution, TaskStatus, TableField, TableSchema,
    task_sql,
};
use sqlfan_shared::sqlparse::{self, SplitError};
use thiserror::Error;
use tracing::{debug, warn};

/// Request to create a fan-out task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub task_name: String,

    #[serde(default)]
    pub description: String,

    /// Instances whose databases participate in exclude-mode expansion
    #[serde(default)]
    pub instance_ids: Vec<i64>,

    /// `include` or `exclude`
    pub database_mode: String,

    /// Included targets, or excluded targets, depending on the mode
    #[serde(default)]
    pub selected_dbs: Vec<TaskDatabase>,

    /// Multi-statement SQL blob, split by the creator
    pub sql_content: String,
}

/// Task creation error
#[derive(Debug, Error)]
pub enum CreateTaskError {
    #[error("task name already exists: {0}")]
    DuplicateName(String),

    #[error("invalid database mode: {0}")]
    InvalidMode(String),

    #[error("no valid SQL statement found")]
    EmptyBatch,

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl From<SplitError> for CreateTaskError {
    fn from(_: SplitError) -> Self {
        CreateTaskError::EmptyBatch
    }
}

/// Creates fan-out tasks
pub struct TaskCreator {
    pool: SqlitePool,
}

impl TaskCreator {
    pub fn new(pool: SqlitePool) -> Self {
        TaskCreator { pool }
    }

    /// Creates a task, its statements, its executions and its result tables.
    pub async fn create(&self, req: &CreateTaskRequest) -> Result<Task, CreateTaskError> {
        if Task::name_exists(&self.pool, &req.task_name).await? {
            return Err(CreateTaskError::DuplicateName(req.task_name.clone()));
        }

        let targets = self.expand_targets(req).await?;
        let statements = sqlparse::split_statements(&req.sql_content)?;

        // header detection, star projections resolved against the first target
        let mut headers_per_statement = Vec::with_capacity(statements.len());
        for statement in &statements {
            headers_per_statement.push(self.resolve_headers(statement, &targets).await);
        }

        let now = Utc::now();
        let databases_json =
            serde_json::to_string(&targets).unwrap_or_else(|_| "[]".to_string());

        let mut tx = self.pool.begin().await?;

        let task = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO query_tasks
                (created_at, updated_at, task_name, description, databases,
                 status, total_dbs, total_sqls)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(&req.task_name)
        .bind(&req.description)
        .bind(&databases_json)
        .bind(TaskStatus::Pending.as_i64())
        .bind(targets.len() as i64)
        .bind(statements.len() as i64)
        .fetch_one(&mut *tx)
        .await?;

        for (index, statement) in statements.iter().enumerate() {
            let sql_order = index as i64 + 1;
            let table_name = task_sql::result_table_name(task.id, sql_order);
            let schema = build_schema(&headers_per_statement[index]);
            let schema_json =
                serde_json::to_string(&schema).unwrap_or_else(|_| r#"{"fields":[]}"#.to_string());

            let ddl = create_table_sql(&table_name, &schema);
            sqlx::query(&ddl).execute(&mut *tx).await?;

            let (sql_id,): (i64,) = sqlx::query_as(
                r#"
                INSERT INTO query_task_sqls
                    (created_at, updated_at, task_id, sql_order, sql_content,
                     result_table_name, result_table_schema, total_dbs)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(task.id)
            .bind(sql_order)
            .bind(statement)
            .bind(&table_name)
            .bind(&schema_json)
            .bind(targets.len() as i64)
            .fetch_one(&mut *tx)
            .await?;

            for target in &targets {
                TaskExecution::insert_pending(
                    &mut tx,
                    task.id,
                    sql_id,
                    target.instance_id,
                    &target.database_name,
                )
                .await?;
            }
        }

        tx.commit().await?;

        debug!(
            task_id = task.id,
            statements = statements.len(),
            targets = targets.len(),
            "Task created"
        );

        Ok(task)
    }

    /// Expands the request's database selection into the concrete target set.
    async fn expand_targets(
        &self,
        req: &CreateTaskRequest,
    ) -> Result<Vec<TaskDatabase>, CreateTaskError> {
        match req.database_mode.as_str() {
            "include" => Ok(self.fill_instance_names(req.selected_dbs.clone()).await),
            "exclude" => {
                let all = Database::list_by_instances(&self.pool, &req.instance_ids).await?;

                let excluded: std::collections::HashSet<(i64, &str)> = req
                    .selected_dbs
                    .iter()
                    .map(|db| (db.instance_id, db.database_name.as_str()))
                    .collect();

                let targets: Vec<TaskDatabase> = all
                    .into_iter()
                    .filter(|db| !excluded.contains(&(db.instance_id, db.name.as_str())))
                    .map(|db| TaskDatabase {
                        instance_id: db.instance_id,
                        database_name: db.name,
                        instance_name: String::new(),
                    })
                    .collect();

                Ok(self.fill_instance_names(targets).await)
            }
            other => Err(CreateTaskError::InvalidMode(other.to_string())),
        }
    }

    /// Fills instance names via batch lookup; a missing instance gets the
    /// synthetic label `instance{id}`.
    async fn fill_instance_names(&self, mut targets: Vec<TaskDatabase>) -> Vec<TaskDatabase> {
        if targets.is_empty() {
            return targets;
        }

        let mut ids: Vec<i64> = targets.iter().map(|t| t.instance_id).collect();
        ids.sort_unstable();
        ids.dedup();

        let names: std::collections::HashMap<i64, String> =
            match Instance::find_by_ids(&self.pool, &ids).await {
                Ok(instances) => instances.into_iter().map(|i| (i.id, i.name)).collect(),
                Err(e) => {
                    warn!(error = %e, "Instance lookup failed while filling names");
                    Default::default()
                }
            };

        for target in &mut targets {
            target.instance_name = names
                .get(&target.instance_id)
                .cloned()
                .unwrap_or_else(|| format!("instance{}", target.instance_id));
        }

        targets
    }

    /// Detects a statement's headers; a `*` projection is replaced by the
    /// driver-reported column names of a probe against the first target.
    ///
    /// Probe failures are non-fatal: creation keeps the literal `*` header
    /// rather than depending on target availability.
    async fn resolve_headers(&self, statement: &str, targets: &[TaskDatabase]) -> Vec<String> {
        let headers = sqlparse::detect_result_headers(statement);

        if !headers.iter().any(|h| h == "*") || targets.is_empty() {
            return headers;
        }

        match self.probe_headers(statement, &targets[0]).await {
            Ok(probed) if !probed.is_empty() => probed,
            Ok(_) => headers,
            Err(e) => {
                warn!(error = %e, "Star probe failed, keeping inferred headers");
                headers
            }
        }
    }

    async fn probe_headers(
        &self,
        statement: &str,
        target: &TaskDatabase,
    ) -> anyhow::Result<Vec<String>> {
        let instance = Instance::find_by_id(&self.pool, target.instance_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("instance {} not found", target.instance_id))?;

        let pool = target::connect(&instance, &target.database_name, 1).await?;

        let probe_sql = if statement.to_uppercase().contains(" LIMIT ") {
            statement.to_string()
        } else {
            format!("{} LIMIT 1", statement)
        };

        let result = async {
            let prepared = pool.prepare(probe_sql.as_str()).await?;
            let columns: Vec<String> = prepared
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect();
            Ok::<_, sqlx::Error>(columns)
        }
        .await;

        pool.close().await;
        Ok(result?)
    }
}

/// Builds a result-table schema: the five system fields plus one TEXT field
/// per header. Blank headers are renamed `field_{n}`.
fn build_schema(headers: &[String]) -> TableSchema {
    let mut fields = vec![
        TableField {
            name: ident::COL_EXECUTION_ID.to_string(),
            field_type: "INTEGER".to_string(),
            comment: "execution id".to_string(),
        },
        TableField {
            name: ident::COL_INSTANCE_ID.to_string(),
            field_type: "TEXT".to_string(),
            comment: "instance id".to_string(),
        },
        TableField {
            name: ident::COL_INSTANCE_NAME.to_string(),
            field_type: "TEXT".to_string(),
            comment: "instance name".to_string(),
        },
        TableField {
            name: ident::COL_DATABASE_NAME.to_string(),
            field_type: "TEXT".to_string(),
            comment: "database name".to_string(),
        },
        TableField {
            name: ident::COL_ERROR_MESSAGE.to_string(),
            field_type: "TEXT".to_string(),
            comment: "error message".to_string(),
        },
    ];

    for (index, header) in headers.iter().enumerate() {
        let name = if header.trim().is_empty() {
            format!("field_{}", index + 1)
        } else {
            header.clone()
        };
        fields.push(TableField {
            name,
            field_type: "TEXT".to_string(),
            comment: String::new(),
        });
    }

    TableSchema { fields }
}

/// Renders the CREATE TABLE statement for a result table. Every column
/// identifier is the base64-url form of its logical name.
fn create_table_sql(table_name: &str, schema: &TableSchema) -> String {
    let mut columns = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let physical = ident::encode(&field.name);
        if field.name == ident::COL_EXECUTION_ID {
            columns.push(format!(
                "\"{}\" INTEGER PRIMARY KEY AUTOINCREMENT",
                physical
            ));
        } else {
            columns.push(format!("\"{}\" {}", physical, field.field_type));
        }
    }

    format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
        table_name,
        columns.join(", ")
    )
}
