//! API route handlers

pub mod configs;
pub mod dashboard;
pub mod databases;
pub mod doc_tasks;
pub mod health;
pub mod instances;
pub mod sql;
pub mod tasks;
