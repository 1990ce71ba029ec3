//! Error handling for the API server
//!
//! Handlers return `ApiResult<T>`; the error half renders as the standard
//! envelope. Unlike a plain REST surface, every response ships as HTTP 200
//! with the semantic code inside the body, so browser clients always parse
//! the envelope.
//!
//! # Example
//!
//! ```
//! use sqlfan_api::error::{ApiError, ApiResult, Envelope};
//! use axum::Json;
//!
//! async fn handler() -> ApiResult<Json<Envelope<u32>>> {
//!     Err(ApiError::NotFound("task 9 not found".to_string()))
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard response envelope
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    /// Semantic code, mirrors HTTP status values
    pub code: u16,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// Wraps payload in a success envelope.
pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        code: 200,
        message: "success".to_string(),
        data: Some(data),
    })
}

/// Success envelope without payload.
pub fn ok_empty() -> Json<Envelope<()>> {
    Json(Envelope {
        code: 200,
        message: "success".to_string(),
        data: None,
    })
}

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Semantic 400
    BadRequest(String),

    /// Semantic 404
    NotFound(String),

    /// Semantic 409, e.g. duplicate task or instance name
    Conflict(String),

    /// Semantic 500
    Internal(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// The semantic code carried inside the envelope.
    pub fn code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::Internal(_) => 500,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(msg) = &self {
            tracing::error!("Internal error: {}", msg);
        }

        let body = Json(Envelope::<()> {
            code: self.code(),
            message: self.to_string(),
            data: None,
        });

        // the transport status stays 200; clients read the envelope code
        (StatusCode::OK, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                if message.contains("UNIQUE constraint failed") {
                    ApiError::Conflict(message)
                } else {
                    ApiError::Internal(format!("database error: {}", message))
                }
            }
            _ => ApiError::Internal(format!("database error: {}", err)),
        }
    }
}

impl From<sqlfan_runner::CreateTaskError> for ApiError {
    fn from(err: sqlfan_runner::CreateTaskError) -> Self {
        use sqlfan_runner::CreateTaskError::*;
        match err {
            DuplicateName(name) => ApiError::Conflict(format!("task name already exists: {}", name)),
            InvalidMode(mode) => ApiError::BadRequest(format!("invalid database mode: {}", mode)),
            EmptyBatch => ApiError::BadRequest("no valid SQL statement found".to_string()),
            Store(e) => e.into(),
        }
    }
}

impl From<sqlfan_runner::service::ServiceError> for ApiError {
    fn from(err: sqlfan_runner::service::ServiceError) -> Self {
        use sqlfan_runner::service::ServiceError::*;
        match err {
            NotFound(what) => ApiError::NotFound(what),
            UnknownSortColumn(column) => {
                ApiError::BadRequest(format!("unknown sort column: {}", column))
            }
            Store(e) => e.into(),
        }
    }
}

impl From<sqlfan_runner::RunnerError> for ApiError {
    fn from(err: sqlfan_runner::RunnerError) -> Self {
        use sqlfan_runner::RunnerError::*;
        match err {
            TaskNotFound(id) => ApiError::NotFound(format!("task {} not found", id)),
            Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ApiError::BadRequest("missing task_name".to_string());
        assert_eq!(err.to_string(), "Bad request: missing task_name");
        assert_eq!(err.code(), 400);

        assert_eq!(ApiError::NotFound(String::new()).code(), 404);
        assert_eq!(ApiError::Conflict(String::new()).code(), 409);
        assert_eq!(ApiError::Internal(String::new()).code(), 500);
    }

    #[test]
    fn test_envelope_omits_missing_data() {
        let body = serde_json::to_string(&Envelope::<()> {
            code: 404,
            message: "not found".to_string(),
            data: None,
        })
        .unwrap();
        assert!(!body.contains("data"));
    }
}
