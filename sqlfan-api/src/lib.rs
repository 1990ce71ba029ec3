//! # sqlfan API server
//!
//! The HTTP surface of sqlfan. Every non-streaming endpoint answers with
//! HTTP 200 and a `{code, message, data?}` envelope whose `code` mirrors
//! the HTTP status semantics; the CSV export is the only raw response.

pub mod app;
pub mod config;
pub mod error;
pub mod routes;
