//! Shared request primitives: pagination and sorting
//!
//! Every list endpoint takes a page / page-size pair and an optional sort
//! specification. Values outside the allowed ranges are clamped rather than
//! rejected; sort columns must come from the caller-supplied whitelist.

use serde::{Deserialize, Serialize};

/// Default page size for list endpoints
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Maximum page size for list endpoints
pub const MAX_PAGE_SIZE: i64 = 100;

/// Lenient deserializers for query-string parameters.
///
/// URL-encoded form values always arrive as strings; when these structs are
/// flattened into an extractor, typed fields must accept both the string
/// form and the native form.
pub mod de {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible<T> {
        Typed(T),
        Text(String),
    }

    pub fn flexible_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Flexible::<i64>::deserialize(deserializer)? {
            Flexible::Typed(value) => Ok(value),
            Flexible::Text(text) if text.is_empty() => Ok(0),
            Flexible::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }

    pub fn flexible_opt_i64<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        match Option::<Flexible<i64>>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Flexible::Typed(value)) => Ok(Some(value)),
            Some(Flexible::Text(text)) if text.is_empty() => Ok(None),
            Some(Flexible::Text(text)) => {
                text.parse().map(Some).map_err(serde::de::Error::custom)
            }
        }
    }

    pub fn flexible_opt_bool<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<bool>, D::Error> {
        match Option::<Flexible<bool>>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Flexible::Typed(value)) => Ok(Some(value)),
            Some(Flexible::Text(text)) => match text.as_str() {
                "" => Ok(None),
                "true" | "1" => Ok(Some(true)),
                "false" | "0" => Ok(Some(false)),
                other => Err(serde::de::Error::custom(format!(
                    "invalid boolean: {}",
                    other
                ))),
            },
        }
    }
}

/// Pagination parameters (1-based page)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    /// Page number, starting at 1
    #[serde(default, deserialize_with = "de::flexible_i64")]
    pub page: i64,

    /// Rows per page, 1..=100
    #[serde(default, deserialize_with = "de::flexible_i64")]
    pub page_size: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    /// Clamps page and page size into their valid ranges.
    pub fn normalize(&mut self) {
        if self.page < 1 {
            self.page = 1;
        }
        if self.page_size < 1 {
            self.page_size = DEFAULT_PAGE_SIZE;
        }
        if self.page_size > MAX_PAGE_SIZE {
            self.page_size = MAX_PAGE_SIZE;
        }
    }

    /// Row offset of the first item on the current page.
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }

    /// Row limit of the current page.
    pub fn limit(&self) -> i64 {
        self.page_size
    }
}

/// Sorting parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sorting {
    /// Column to sort by; must be whitelisted by the endpoint
    #[serde(default)]
    pub sort_field: Option<String>,

    /// `asc` or `desc` (default `desc`)
    #[serde(default)]
    pub sort_order: Option<String>,
}

impl Sorting {
    /// Resolves the ORDER BY clause against a column whitelist.
    ///
    /// Returns `None` when no sort field was requested, `Err` with the
    /// offending field when the field is not whitelisted.
    pub fn order_clause(&self, whitelist: &[&str]) -> Result<Option<String>, String> {
        let field = match self.sort_field.as_deref() {
            Some(f) if !f.is_empty() => f,
            _ => return Ok(None),
        };

        if !whitelist.contains(&field) {
            return Err(field.to_string());
        }

        let direction = match self.sort_order.as_deref() {
            Some(o) if o.eq_ignore_ascii_case("asc") => "ASC",
            _ => "DESC",
        };

        Ok(Some(format!("{} {}", field, direction)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults() {
        let p = Pagination::default();
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_pagination_normalize_clamps() {
        let mut p = Pagination { page: 0, page_size: 1000 };
        p.normalize();
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size, MAX_PAGE_SIZE);

        let mut p = Pagination { page: -3, page_size: 0 };
        p.normalize();
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_pagination_offset() {
        let p = Pagination { page: 3, page_size: 20 };
        assert_eq!(p.offset(), 40);
        assert_eq!(p.limit(), 20);
    }

    #[test]
    fn test_sorting_whitelist() {
        let s = Sorting {
            sort_field: Some("created_at".to_string()),
            sort_order: Some("asc".to_string()),
        };
        assert_eq!(
            s.order_clause(&["id", "created_at"]).unwrap(),
            Some("created_at ASC".to_string())
        );
    }

    #[test]
    fn test_sorting_rejects_unknown_column() {
        let s = Sorting {
            sort_field: Some("password".to_string()),
            sort_order: None,
        };
        assert!(s.order_clause(&["id"]).is_err());
    }

    #[test]
    fn test_sorting_default_is_none() {
        assert_eq!(Sorting::default().order_clause(&["id"]).unwrap(), None);
    }
}
