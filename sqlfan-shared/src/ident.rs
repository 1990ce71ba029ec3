//! Physical identifier codec for dynamic result tables
//!
//! Result tables hold one column per detected result header. Headers come
//! from user-authored SQL and may be SQL-reserved words, contain spaces, or
//! be arbitrary Unicode. Instead of quoting gymnastics, every physical
//! column identifier is the base64-url (no padding) form of its logical
//! name; the logical names live in the sidecar `result_table_schema` JSON
//! and are restored on read.
//!
//! # Example
//!
//! ```
//! use sqlfan_shared::ident;
//!
//! let physical = ident::encode("订单数");
//! assert_eq!(ident::decode(&physical).as_deref(), Some("订单数"));
//! ```

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Logical name of the auto-increment primary key of every result table.
pub const COL_EXECUTION_ID: &str = "query_task_execution_id";

/// Logical name of the instance-id system column.
pub const COL_INSTANCE_ID: &str = "query_task_execution_instance_id";

/// Logical name of the instance-name system column.
pub const COL_INSTANCE_NAME: &str = "query_task_execution_instance_name";

/// Logical name of the database-name system column.
pub const COL_DATABASE_NAME: &str = "query_task_execution_database_name";

/// Logical name of the error-message system column.
pub const COL_ERROR_MESSAGE: &str = "query_task_execution_error_message";

/// The five fixed system columns, in declaration order.
pub const SYSTEM_COLUMNS: [&str; 5] = [
    COL_EXECUTION_ID,
    COL_INSTANCE_ID,
    COL_INSTANCE_NAME,
    COL_DATABASE_NAME,
    COL_ERROR_MESSAGE,
];

/// Encodes a logical column name into its physical identifier.
pub fn encode(logical: &str) -> String {
    URL_SAFE_NO_PAD.encode(logical.as_bytes())
}

/// Decodes a physical identifier back to its logical column name.
///
/// Returns `None` when the identifier is not valid base64-url or does not
/// decode to UTF-8 (e.g. a column that was never encoded).
pub fn decode(physical: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(physical.as_bytes()).ok()?;
    String::from_utf8(bytes).ok()
}
