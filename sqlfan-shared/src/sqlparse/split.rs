//! Multi-statement SQL splitting
//!
//! Splits a free-form SQL blob into ordered statements. Comments are
//! stripped first (string-literal aware), then the remainder is split on
//! semicolons that sit outside string literals. Whitespace-only candidates
//! are dropped.
//!
//! # Rules
//!
//! - `--` starts a line comment until the next `\n` or `\r`
//! - `/*` starts a block comment until the next `*/`; nesting is not
//!   supported, the first `*/` closes
//! - comment delimiters inside string literals are literal text
//! - a quote toggles its matching string state unless preceded by `\`
//! - `;` splits only outside strings and comments
//!
//! # Example
//!
//! ```
//! use sqlfan_shared::sqlparse::split_statements;
//!
//! let stmts = split_statements("SELECT 1; SELECT 2;").unwrap();
//! assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
//! ```

use thiserror::Error;

/// Splitting error
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    /// The input contained no statement after comment stripping
    #[error("no valid SQL statement found")]
    EmptyBatch,
}

/// Splits a multi-statement SQL blob into ordered, trimmed statements.
///
/// # Errors
///
/// Returns [`SplitError::EmptyBatch`] when nothing remains after comment
/// stripping and trimming.
pub fn split_statements(sql: &str) -> Result<Vec<String>, SplitError> {
    let stripped = strip_comments(sql);

    let statements: Vec<String> = split_on_semicolons(&stripped)
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if statements.is_empty() {
        return Err(SplitError::EmptyBatch);
    }

    Ok(statements)
}

/// Removes `--` line comments and `/* */` block comments, leaving string
/// literal content untouched.
fn strip_comments(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());

    let mut in_single = false;
    let mut in_double = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];

        if !in_single && !in_double && !in_block_comment && !in_line_comment {
            if c == b'-' && bytes.get(i + 1) == Some(&b'-') {
                in_line_comment = true;
                i += 2;
                continue;
            }
            if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
                in_block_comment = true;
                i += 2;
                continue;
            }
        }

        if in_line_comment {
            if c == b'\n' || c == b'\r' {
                in_line_comment = false;
                out.push(c);
            }
            i += 1;
            continue;
        }

        if in_block_comment {
            if c == b'*' && bytes.get(i + 1) == Some(&b'/') {
                in_block_comment = false;
                i += 1;
            }
            i += 1;
            continue;
        }

        let escaped = i > 0 && bytes[i - 1] == b'\\';
        if c == b'\'' && !in_double && !escaped {
            in_single = !in_single;
        } else if c == b'"' && !in_single && !escaped {
            in_double = !in_double;
        }

        out.push(c);
        i += 1;
    }

    // comments never sit inside string literals, so the buffer stays valid UTF-8
    String::from_utf8(out).unwrap_or_default()
}

/// Splits on `;` outside string literals.
fn split_on_semicolons(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut current = Vec::new();

    let mut in_string = false;
    let mut string_char = 0u8;

    for (i, &c) in bytes.iter().enumerate() {
        if !in_string && (c == b'\'' || c == b'"') {
            in_string = true;
            string_char = c;
            current.push(c);
        } else if in_string && c == string_char {
            if i > 0 && bytes[i - 1] == b'\\' {
                current.push(c);
            } else {
                in_string = false;
                current.push(c);
            }
        } else if !in_string && c == b';' {
            statements.push(String::from_utf8_lossy(&current).into_owned());
            current.clear();
        } else {
            current.push(c);
        }
    }

    if !current.is_empty() {
        statements.push(String::from_utf8_lossy(&current).into_owned());
    }

    statements
}
