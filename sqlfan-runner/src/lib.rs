//! # sqlfan runner
//!
//! The execution side of sqlfan: creating fan-out tasks, running them
//! concurrently against their target databases, rolling results up, and
//! triggering interval-driven background jobs.
//!
//! ## Module Organization
//!
//! - `creator`: expands a task request into Task / TaskSql / TaskExecution
//!   rows and provisions result tables
//! - `runner`: the concurrent fan-out engine
//! - `persist`: the batched execution-persistence queue
//! - `service`: read paths, reset, batch delete, result queries
//! - `scheduler`: the 60-second interval tick for sync and doc jobs
//! - `sync`: instance database synchronization

pub mod creator;
pub mod persist;
pub mod runner;
pub mod scheduler;
pub mod service;
pub mod sync;

pub use creator::{CreateTaskError, CreateTaskRequest, TaskCreator};
pub use runner::{RunnerError, TaskRunner};
pub use scheduler::{DocJobHandler, IntervalScheduler, LogOnlyDocJob};
