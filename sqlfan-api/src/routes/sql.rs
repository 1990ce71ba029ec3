//! SQL validation endpoint

use crate::{
    app::AppState,
    error::{ok, ApiError, ApiResult, Envelope},
};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use sqlfan_shared::sqlparse;

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub sql_content: String,
}

#[derive(Debug, Serialize)]
pub struct ValidatedStatement {
    pub index: usize,
    pub sql: String,
    pub headers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub statement_count: usize,
    pub statements: Vec<ValidatedStatement>,
}

/// Splits the batch and reports per-statement shape; an empty batch is the
/// invalid-input case.
pub async fn validate(
    State(_state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> ApiResult<Json<Envelope<ValidateResponse>>> {
    if req.sql_content.trim().is_empty() {
        return Err(ApiError::BadRequest("sql_content is required".to_string()));
    }

    let statements = sqlparse::split_statements(&req.sql_content)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let validated: Vec<ValidatedStatement> = statements
        .into_iter()
        .enumerate()
        .map(|(index, sql)| {
            let headers = sqlparse::detect_result_headers(&sql);
            ValidatedStatement {
                index: index + 1,
                sql,
                headers,
            }
        })
        .collect();

    Ok(ok(ValidateResponse {
        valid: true,
        statement_count: validated.len(),
        statements: validated,
    }))
}
