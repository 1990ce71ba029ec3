//! Observed-database endpoints

use crate::{
    app::AppState,
    error::{ok, ApiError, ApiResult, Envelope},
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlfan_shared::models::{Database, Instance, Pagination};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default, deserialize_with = "sqlfan_shared::models::common::de::flexible_opt_i64")]
    pub instance_id: Option<i64>,
    pub name: Option<String>,
    #[serde(flatten)]
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub total: i64,
    pub items: Vec<Database>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(mut query): Query<ListQuery>,
) -> ApiResult<Json<Envelope<ListResponse>>> {
    query.pagination.normalize();
    let (total, items) = Database::list(
        &state.db,
        query.instance_id,
        query.name.as_deref(),
        query.pagination.limit(),
        query.pagination.offset(),
    )
    .await?;
    Ok(ok(ListResponse { total, items }))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Envelope<Database>>> {
    let database = Database::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("database {} not found", id)))?;
    Ok(ok(database))
}

#[derive(Debug, Deserialize)]
pub struct BatchListRequest {
    pub instance_ids: Vec<i64>,
}

/// Databases of one instance, for grouped pickers.
#[derive(Debug, Serialize)]
pub struct InstanceDatabases {
    pub instance_id: i64,
    pub instance_name: String,
    pub databases: Vec<Database>,
}

/// Lists the databases of several instances, grouped per instance.
pub async fn batch_list(
    State(state): State<AppState>,
    Json(req): Json<BatchListRequest>,
) -> ApiResult<Json<Envelope<Vec<InstanceDatabases>>>> {
    if req.instance_ids.is_empty() {
        return Err(ApiError::BadRequest("instance_ids is required".to_string()));
    }

    let names: HashMap<i64, String> = Instance::find_by_ids(&state.db, &req.instance_ids)
        .await?
        .into_iter()
        .map(|i| (i.id, i.name))
        .collect();

    let mut grouped: HashMap<i64, Vec<Database>> = HashMap::new();
    for database in Database::list_by_instances(&state.db, &req.instance_ids).await? {
        grouped.entry(database.instance_id).or_default().push(database);
    }

    let items = req
        .instance_ids
        .iter()
        .map(|&id| InstanceDatabases {
            instance_id: id,
            instance_name: names.get(&id).cloned().unwrap_or_default(),
            databases: grouped.remove(&id).unwrap_or_default(),
        })
        .collect();

    Ok(ok(items))
}
