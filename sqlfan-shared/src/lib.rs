//! # sqlfan shared library
//!
//! This crate contains the data model, local store, target connectivity and
//! SQL parsing primitives shared by the sqlfan API server and the task
//! runner.
//!
//! ## Module Organization
//!
//! - `models`: local-store models and their query methods
//! - `db`: local SQLite store and outbound MySQL target pools
//! - `sqlparse`: statement splitting and result-header detection
//! - `ident`: base64-url codec for physical result-table identifiers
//! - `config_cache`: read-through key/value cache over the `configs` table

pub mod config_cache;
pub mod db;
pub mod ident;
pub mod models;
pub mod sqlparse;

/// Current version of the sqlfan shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
