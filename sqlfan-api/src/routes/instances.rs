//! Instance endpoints: CRUD, options, connection test, sync, export/import

use crate::{
    app::AppState,
    error::{ok, ok_empty, ApiError, ApiResult, Envelope},
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlfan_runner::sync;
use sqlfan_shared::models::{instance::UpsertInstance, Instance, Pagination};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub name: Option<String>,
    #[serde(flatten)]
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub total: i64,
    pub items: Vec<Instance>,
}

fn validate(req: &UpsertInstance) -> Result<(), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("instance name is required".to_string()));
    }
    if req.host.trim().is_empty() {
        return Err(ApiError::BadRequest("host is required".to_string()));
    }
    if req.port <= 0 || req.port > 65535 {
        return Err(ApiError::BadRequest("port must be 1..=65535".to_string()));
    }
    Ok(())
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<UpsertInstance>,
) -> ApiResult<Json<Envelope<Instance>>> {
    validate(&req)?;
    if Instance::find_by_name(&state.db, &req.name).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "instance name already exists: {}",
            req.name
        )));
    }
    let instance = Instance::create(&state.db, &req).await?;
    Ok(ok(instance))
}

pub async fn list(
    State(state): State<AppState>,
    Query(mut query): Query<ListQuery>,
) -> ApiResult<Json<Envelope<ListResponse>>> {
    query.pagination.normalize();
    let (total, items) = Instance::list(
        &state.db,
        query.name.as_deref(),
        query.pagination.limit(),
        query.pagination.offset(),
    )
    .await?;
    Ok(ok(ListResponse { total, items }))
}

/// Compact id + name list for pickers.
#[derive(Debug, Serialize)]
pub struct InstanceOption {
    pub id: i64,
    pub name: String,
}

pub async fn options(
    State(state): State<AppState>,
) -> ApiResult<Json<Envelope<Vec<InstanceOption>>>> {
    let items = Instance::list_all(&state.db)
        .await?
        .into_iter()
        .map(|i| InstanceOption {
            id: i.id,
            name: i.name,
        })
        .collect();
    Ok(ok(items))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Envelope<Instance>>> {
    let instance = Instance::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("instance {} not found", id)))?;
    Ok(ok(instance))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpsertInstance>,
) -> ApiResult<Json<Envelope<Instance>>> {
    validate(&req)?;
    if let Some(existing) = Instance::find_by_name(&state.db, &req.name).await? {
        if existing.id != id {
            return Err(ApiError::Conflict(format!(
                "instance name already exists: {}",
                req.name
            )));
        }
    }
    let instance = Instance::update(&state.db, id, &req)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("instance {} not found", id)))?;
    Ok(ok(instance))
}

pub async fn delete_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Envelope<()>>> {
    if !Instance::delete(&state.db, id).await? {
        return Err(ApiError::NotFound(format!("instance {} not found", id)));
    }
    Ok(ok_empty())
}

#[derive(Debug, Serialize)]
pub struct TestResponse {
    pub version: String,
}

/// Probes connectivity and reports the server version.
pub async fn test(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Envelope<TestResponse>>> {
    let instance = Instance::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("instance {} not found", id)))?;

    let version = sync::test_connection(&instance)
        .await
        .map_err(|e| ApiError::BadRequest(format!("connection failed: {}", e)))?;

    Instance::set_version(&state.db, id, &version).await?;
    Ok(ok(TestResponse { version }))
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub instance_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub errors: Vec<String>,
}

/// Rebuilds the observed databases of the given instances.
pub async fn sync(
    State(state): State<AppState>,
    Json(req): Json<SyncRequest>,
) -> ApiResult<Json<Envelope<SyncResponse>>> {
    if req.instance_ids.is_empty() {
        return Err(ApiError::BadRequest("instance_ids is required".to_string()));
    }
    let errors = sync::sync_instances(&state.db, &req.instance_ids)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(ok(SyncResponse { errors }))
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub instance_ids: Vec<i64>,
}

/// Portable instance description, passwords included.
#[derive(Debug, Serialize, Deserialize)]
pub struct PortableInstance {
    pub name: String,
    pub host: String,
    pub port: i64,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub params: Vec<sqlfan_shared::models::InstanceParam>,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub sync_interval: i64,
}

pub async fn export(
    State(state): State<AppState>,
    Json(req): Json<ExportRequest>,
) -> ApiResult<Json<Envelope<Vec<PortableInstance>>>> {
    let instances = if req.instance_ids.is_empty() {
        Instance::list_all(&state.db).await?
    } else {
        Instance::find_by_ids(&state.db, &req.instance_ids).await?
    };

    let items = instances
        .into_iter()
        .map(|i| PortableInstance {
            params: i.params_list(),
            name: i.name,
            host: i.host,
            port: i.port,
            username: i.username,
            password: i.password,
            remark: i.remark,
            sync_interval: i.sync_interval,
        })
        .collect();
    Ok(ok(items))
}

#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    pub succeeded: i64,
    pub skipped: i64,
    pub failed: i64,
    pub errors: Vec<String>,
}

/// Imports instances; existing names are skipped.
pub async fn import(
    State(state): State<AppState>,
    Json(items): Json<Vec<PortableInstance>>,
) -> ApiResult<Json<Envelope<ImportSummary>>> {
    let mut summary = ImportSummary::default();

    for item in items {
        if Instance::find_by_name(&state.db, &item.name).await?.is_some() {
            summary.skipped += 1;
            continue;
        }
        let upsert = UpsertInstance {
            name: item.name.clone(),
            host: item.host,
            port: item.port,
            username: item.username,
            password: item.password,
            params: item.params,
            remark: item.remark,
            sync_interval: item.sync_interval,
        };
        match Instance::create(&state.db, &upsert).await {
            Ok(_) => summary.succeeded += 1,
            Err(e) => {
                summary.failed += 1;
                summary.errors.push(format!("{}: {}", item.name, e));
            }
        }
    }

    Ok(ok(summary))
}
