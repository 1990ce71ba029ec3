//! Database connectivity
//!
//! - `store`: the embedded SQLite store holding all models and the dynamic
//!   per-statement result tables
//! - `target`: outbound MySQL connectivity to registered instances

pub mod store;
pub mod target;

pub use store::{open_store, StoreConfig};
pub use target::{target_dsn, TargetPools};
