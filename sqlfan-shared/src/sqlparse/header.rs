//! Result-header detection
//!
//! Infers the list of result column names a single SQL statement will
//! produce, without touching a live server:
//!
//! 1. `SELECT` statements: scan the projection list; an alias wins, an
//!    unaliased projection contributes its verbatim expression text, and a
//!    star projection contributes the literal `*` (replaced downstream by a
//!    probe against a real target).
//! 2. `SHOW` / `EXPLAIN` / `DESC` commands: a fixed canonical column list
//!    per command shape.
//! 3. Anything else: the single column `result`.
//!
//! # Example
//!
//! ```
//! use sqlfan_shared::sqlparse::detect_result_headers;
//!
//! let headers = detect_result_headers("SELECT a AS x, b FROM t");
//! assert_eq!(headers, vec!["x", "b"]);
//! ```

/// Detects the result headers of a single statement.
pub fn detect_result_headers(sql: &str) -> Vec<String> {
    let sql = sql.trim();
    let upper = sql.to_uppercase();

    if upper.starts_with("SELECT") {
        if let Some(headers) = select_headers(sql) {
            return headers;
        }
    }

    if let Some(headers) = system_command_headers(&upper) {
        return headers;
    }

    vec!["result".to_string()]
}

/// Extracts headers from a SELECT projection list.
///
/// Returns `None` when the projection list cannot be located (the caller
/// then falls through to the generic `result` column).
fn select_headers(sql: &str) -> Option<Vec<String>> {
    let list = projection_list(sql)?;

    let mut headers = Vec::new();
    for item in split_top_level(&list) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        if item == "*" || item.ends_with(".*") {
            headers.push("*".to_string());
            continue;
        }
        headers.push(projection_name(item));
    }

    if headers.is_empty() {
        None
    } else {
        Some(headers)
    }
}

/// Slices the text between the SELECT keyword (and its modifiers) and the
/// top-level FROM keyword, or to the end of the statement when no FROM
/// exists.
fn projection_list(sql: &str) -> Option<String> {
    let after_select = sql.get(6..)?.trim_start();

    // strip projection modifiers
    let mut rest = after_select;
    for modifier in ["DISTINCTROW", "DISTINCT", "ALL"] {
        let bytes = rest.as_bytes();
        if bytes.len() > modifier.len()
            && bytes[..modifier.len()].eq_ignore_ascii_case(modifier.as_bytes())
            && bytes[modifier.len()].is_ascii_whitespace()
        {
            rest = rest[modifier.len()..].trim_start();
            break;
        }
    }

    match find_top_level_keyword(rest, "FROM") {
        Some(pos) => Some(rest[..pos].trim().to_string()),
        None => Some(rest.trim().to_string()),
    }
}

/// Derives the header for one non-star projection: the alias when an `AS`
/// clause is present, otherwise the verbatim expression text.
fn projection_name(item: &str) -> String {
    if let Some(pos) = find_top_level_keyword(item, "AS") {
        let alias = item[pos + 2..].trim();
        let alias = alias.trim_matches(|c| c == '`' || c == '"' || c == '\'');
        if !alias.is_empty() {
            return alias.to_string();
        }
    }
    item.to_string()
}

/// Splits a projection list on commas that sit outside parentheses and
/// quotes.
fn split_top_level(list: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for c in list.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    current.push(c);
                }
                '(' => {
                    depth += 1;
                    current.push(c);
                }
                ')' => {
                    depth = depth.saturating_sub(1);
                    current.push(c);
                }
                ',' if depth == 0 => {
                    items.push(std::mem::take(&mut current));
                }
                _ => current.push(c),
            },
        }
    }

    if !current.trim().is_empty() {
        items.push(current);
    }

    items
}

/// Finds a standalone keyword at parenthesis depth 0 outside quotes.
///
/// Matching is case-insensitive; the keyword must be delimited by
/// non-identifier characters (or the string boundary) on both sides.
/// Returns the byte offset of the match.
fn find_top_level_keyword(text: &str, keyword: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let kw = keyword.as_bytes();

    let mut depth = 0usize;
    let mut quote: Option<u8> = None;

    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                b'\'' | b'"' | b'`' => quote = Some(c),
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                _ => {
                    if depth == 0
                        && i + kw.len() <= bytes.len()
                        && bytes[i..i + kw.len()].eq_ignore_ascii_case(kw)
                        && (i == 0 || !is_ident_byte(bytes[i - 1]))
                        && bytes
                            .get(i + kw.len())
                            .map_or(true, |&b| !is_ident_byte(b))
                    {
                        return Some(i);
                    }
                }
            },
        }
        i += 1;
    }

    None
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'$'
}

/// Canonical column lists for MySQL system commands.
fn system_command_headers(upper: &str) -> Option<Vec<String>> {
    let cols: &[&str] = if upper.starts_with("SHOW TABLES") {
        &["Tables_in_xxx"]
    } else if upper.starts_with("SHOW DATABASES") {
        &["Database"]
    } else if upper.starts_with("SHOW INDEX") {
        &[
            "Table",
            "Non_unique",
            "Key_name",
            "Seq_in_index",
            "Column_name",
            "Collation",
            "Cardinality",
            "Sub_part",
            "Packed",
            "Null",
            "Index_type",
            "Comment",
            "Index_comment",
            "Visible",
            "Expression",
        ]
    } else if upper.starts_with("SHOW PROCESSLIST") {
        &["Id", "User", "Host", "db", "Command", "Time", "State", "Info"]
    } else if upper.starts_with("SHOW VARIABLES") || upper.starts_with("SHOW STATUS") {
        &["Variable_name", "Value"]
    } else if upper.starts_with("SHOW ENGINES") {
        &["Engine", "Support", "Comment", "Transactions", "XA", "Savepoints"]
    } else if upper.starts_with("SHOW CREATE TABLE") {
        &["Table", "Create Table"]
    } else if upper.starts_with("SHOW GRANTS") {
        &["Grants for user"]
    } else if upper.starts_with("SHOW WARNINGS") || upper.starts_with("SHOW ERRORS") {
        &["Level", "Code", "Message"]
    } else if upper.starts_with("SHOW EVENTS") {
        &[
            "Db",
            "Name",
            "Definer",
            "Time zone",
            "Type",
            "Execute at",
            "Interval value",
            "Interval field",
            "Starts",
            "Ends",
            "Status",
            "Originator",
            "character_set_client",
            "collation_connection",
            "Database Collation",
        ]
    } else if upper.starts_with("SHOW TRIGGERS") {
        &[
            "Trigger",
            "Event",
            "Table",
            "Statement",
            "Timing",
            "Created",
            "sql_mode",
            "Definer",
            "character_set_client",
            "collation_connection",
            "Database Collation",
        ]
    } else if upper.starts_with("SHOW PROCEDURE STATUS") || upper.starts_with("SHOW FUNCTION STATUS")
    {
        &[
            "Db",
            "Name",
            "Type",
            "Definer",
            "Modified",
            "Created",
            "Security_type",
            "Comment",
            "character_set_client",
            "collation_connection",
            "Database Collation",
        ]
    } else if upper.starts_with("SHOW COLUMNS")
        || upper.starts_with("SHOW FIELDS")
        || upper.starts_with("DESC")
        || upper.starts_with("DESCRIBE")
    {
        &["Field", "Type", "Null", "Key", "Default", "Extra"]
    } else if upper.starts_with("EXPLAIN") {
        &[
            "id",
            "select_type",
            "table",
            "partitions",
            "type",
            "possible_keys",
            "key",
            "key_len",
            "ref",
            "rows",
            "filtered",
            "Extra",
        ]
    } else {
        return None;
    };

    Some(cols.iter().map(|c| c.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_with_aliases() {
        assert_eq!(
            detect_result_headers("SELECT a AS x, b, COUNT(*) AS cnt FROM t"),
            vec!["x", "b", "cnt"]
        );
    }

    #[test]
    fn test_select_star() {
        assert_eq!(detect_result_headers("SELECT * FROM t"), vec!["*"]);
    }

    #[test]
    fn test_select_qualified_star() {
        assert_eq!(detect_result_headers("SELECT t.* FROM t"), vec!["*"]);
    }

    #[test]
    fn test_select_qualified_column_preserved() {
        assert_eq!(
            detect_result_headers("SELECT t.id, u.name FROM t JOIN u ON u.id = t.uid"),
            vec!["t.id", "u.name"]
        );
    }

    #[test]
    fn test_select_expression_verbatim() {
        assert_eq!(
            detect_result_headers("SELECT COUNT(*), MAX(age) FROM t"),
            vec!["COUNT(*)", "MAX(age)"]
        );
    }

    #[test]
    fn test_select_without_from() {
        assert_eq!(detect_result_headers("SELECT 1, 2"), vec!["1", "2"]);
    }

    #[test]
    fn test_select_distinct() {
        assert_eq!(
            detect_result_headers("SELECT DISTINCT name FROM t"),
            vec!["name"]
        );
    }

    #[test]
    fn test_comma_inside_function_not_split() {
        assert_eq!(
            detect_result_headers("SELECT CONCAT(a, b) AS ab, c FROM t"),
            vec!["ab", "c"]
        );
    }

    #[test]
    fn test_from_inside_string_not_matched() {
        assert_eq!(
            detect_result_headers("SELECT 'from' AS kw, x FROM t"),
            vec!["kw", "x"]
        );
    }

    #[test]
    fn test_quoted_alias() {
        assert_eq!(
            detect_result_headers("SELECT a AS `订单数` FROM t"),
            vec!["订单数"]
        );
    }

    #[test]
    fn test_show_columns() {
        assert_eq!(
            detect_result_headers("SHOW COLUMNS FROM t"),
            vec!["Field", "Type", "Null", "Key", "Default", "Extra"]
        );
    }

    #[test]
    fn test_show_databases() {
        assert_eq!(detect_result_headers("show databases"), vec!["Database"]);
    }

    #[test]
    fn test_show_variables() {
        assert_eq!(
            detect_result_headers("SHOW VARIABLES LIKE 'max%'"),
            vec!["Variable_name", "Value"]
        );
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            detect_result_headers("DESCRIBE users"),
            vec!["Field", "Type", "Null", "Key", "Default", "Extra"]
        );
    }

    #[test]
    fn test_explain() {
        let headers = detect_result_headers("EXPLAIN SELECT * FROM t");
        assert_eq!(headers.len(), 12);
        assert_eq!(headers[0], "id");
    }

    #[test]
    fn test_fallback_for_dml() {
        assert_eq!(
            detect_result_headers("UPDATE t SET a = 1"),
            vec!["result"]
        );
    }
}
