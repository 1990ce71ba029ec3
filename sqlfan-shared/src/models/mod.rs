//! Local-store models
//!
//! Every model is a `sqlx::FromRow` struct with static async query methods
//! against the SQLite store.
//!
//! # Models
//!
//! - `instance`: connection coordinates of a remote MySQL server
//! - `database`: a database observed on an instance during sync
//! - `task`: one fan-out job with its target snapshot and counters
//! - `task_sql`: one statement within a task, owning a result table
//! - `task_execution`: one `(statement, target database)` crossing
//! - `doc_task`: an interval-driven documentation job
//! - `config`: key/value row backing the config cache
//! - `common`: pagination and sorting request primitives

pub mod common;
pub mod config;
pub mod database;
pub mod doc_task;
pub mod instance;
pub mod task;
pub mod task_execution;
pub mod task_sql;

pub use common::{Pagination, Sorting};
pub use config::ConfigEntry;
pub use database::{Database, ObservedDatabase};
pub use doc_task::DocTask;
pub use instance::{Instance, InstanceParam};
pub use task::{Task, TaskDatabase, TaskStatus};
pub use task_execution::{ExecutionStatus, TaskExecution};
pub use task_sql::{TableField, TableSchema, TaskSql};
