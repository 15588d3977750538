// Sync REST handlers: config CRUD, job dispatch and status, conflict
// review and resolution, and incoming automation webhooks.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::http_server::AppState;
use crate::http_types::{created, ok, ApiError, ApiResult};
use crate::repository::sync_store::{NewFieldMapping, NewSyncConfig};
use crate::sync::{execute_sync, SyncContext};
use crate::types::{ConflictResolutionStatus, ConflictStrategy};

#[derive(Debug, Deserialize)]
pub struct FieldMappingRequest {
    pub master_column: String,
    pub slave_column: String,
    pub transform: Option<String>,
    #[serde(default)]
    pub is_key_field: bool,
    #[serde(default)]
    pub skip_sync: bool,
}

#[derive(Debug, Deserialize)]
pub struct SyncConfigCreateRequest {
    pub name: String,
    pub description: Option<String>,
    pub master_datasource_id: String,
    pub slave_datasource_id: String,
    pub master_view_id: Option<String>,
    pub slave_view_id: Option<String>,
    pub master_table: String,
    pub slave_table: String,
    pub master_pk_column: Option<String>,
    pub slave_pk_column: Option<String>,
    pub conflict_strategy: Option<String>,
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub sync_deletes: bool,
    pub batch_size: Option<i32>,
    pub cron_schedule: Option<String>,
    #[serde(default)]
    pub field_mappings: Vec<FieldMappingRequest>,
}

pub async fn create_sync_config(
    State(state): State<AppState>,
    Json(request): Json<SyncConfigCreateRequest>,
) -> ApiResult {
    let strategy = request
        .conflict_strategy
        .as_deref()
        .unwrap_or("source_wins");
    strategy
        .parse::<ConflictStrategy>()
        .map_err(|_| ApiError::validation(format!("unknown conflict strategy: {strategy}")))?;

    let key_fields = request
        .field_mappings
        .iter()
        .filter(|m| m.is_key_field)
        .count();
    if key_fields > 1 {
        return Err(ApiError::validation(
            "at most one field mapping may be the key field",
        ));
    }

    let config = state
        .store
        .create_sync_config(NewSyncConfig {
            name: request.name,
            description: request.description,
            master_datasource_id: request.master_datasource_id,
            slave_datasource_id: request.slave_datasource_id,
            master_view_id: request.master_view_id,
            slave_view_id: request.slave_view_id,
            master_table: request.master_table,
            slave_table: request.slave_table,
            master_pk_column: request.master_pk_column.unwrap_or_else(|| "id".into()),
            slave_pk_column: request.slave_pk_column.unwrap_or_else(|| "id".into()),
            conflict_strategy: strategy.to_string(),
            webhook_url: request.webhook_url,
            sync_deletes: request.sync_deletes,
            batch_size: request.batch_size.unwrap_or(100),
            cron_schedule: request.cron_schedule,
            field_mappings: request
                .field_mappings
                .into_iter()
                .map(|m| NewFieldMapping {
                    master_column: m.master_column,
                    slave_column: m.slave_column,
                    transform: m.transform,
                    is_key_field: m.is_key_field,
                    skip_sync: m.skip_sync,
                })
                .collect(),
        })
        .await?;
    Ok(created(serde_json::to_value(config).unwrap_or_default()))
}

pub async fn list_sync_configs(State(state): State<AppState>) -> ApiResult {
    let configs = state.store.list_sync_configs().await?;
    Ok(ok(serde_json::to_value(configs).unwrap_or_default()))
}

pub async fn get_sync_config(
    State(state): State<AppState>,
    Path(config_id): Path<String>,
) -> ApiResult {
    let config = state
        .store
        .get_sync_config(&config_id)
        .await?
        .ok_or_else(|| ApiError::not_found("sync config"))?;
    Ok(ok(serde_json::to_value(config).unwrap_or_default()))
}

pub async fn delete_sync_config(
    State(state): State<AppState>,
    Path(config_id): Path<String>,
) -> ApiResult {
    if !state.store.delete_sync_config(&config_id).await? {
        return Err(ApiError::not_found("sync config"));
    }
    Ok((StatusCode::NO_CONTENT, Json(Value::Null)))
}

// --- job dispatch and status ---

async fn dispatch_job(state: &AppState, config_id: &str, triggered_by: &str) -> ApiResult {
    let config = state
        .store
        .get_sync_config(config_id)
        .await?
        .ok_or_else(|| ApiError::not_found("sync config"))?;
    if !config.active {
        return Err(ApiError::validation("sync config is not active"));
    }

    let job = state.store.create_sync_job(config_id, triggered_by).await?;
    info!("Dispatching sync job {} for config {config_id}", job.id);

    let ctx = SyncContext {
        store: state.store.clone(),
        cache: state.cache.clone(),
    };
    let job_id = job.id.clone();
    let config_id = config_id.to_string();
    tokio::spawn(async move {
        execute_sync(ctx, job_id, config_id).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"success": true, "data": job})),
    ))
}

pub async fn execute_sync_job(
    State(state): State<AppState>,
    Path(config_id): Path<String>,
) -> ApiResult {
    dispatch_job(&state, &config_id, "manual").await
}

pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult {
    let job = state
        .store
        .get_sync_job(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("job"))?;
    Ok(ok(serde_json::to_value(job).unwrap_or_default()))
}

#[derive(Debug, Default, Deserialize)]
pub struct JobListParams {
    pub config_id: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListParams>,
) -> ApiResult {
    let jobs = state
        .store
        .list_sync_jobs(params.config_id.as_deref(), params.limit.unwrap_or(20))
        .await?;
    Ok(ok(serde_json::to_value(jobs).unwrap_or_default()))
}

// --- conflicts ---

#[derive(Debug, Default, Deserialize)]
pub struct ConflictListParams {
    pub status_filter: Option<String>,
}

pub async fn list_conflicts(
    State(state): State<AppState>,
    Path(config_id): Path<String>,
    Query(params): Query<ConflictListParams>,
) -> ApiResult {
    let conflicts = state
        .store
        .list_conflicts(
            &config_id,
            params.status_filter.as_deref().unwrap_or("pending"),
        )
        .await?;
    Ok(ok(serde_json::to_value(conflicts).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
pub struct ConflictResolveRequest {
    pub resolution: String,
    pub merged_data: Option<Value>,
    pub resolved_by: Option<String>,
    pub notes: Option<String>,
}

/// Resolve one conflict. By contract this records the decision only; it
/// never re-runs the sync.
pub async fn resolve_conflict(
    State(state): State<AppState>,
    Path((config_id, conflict_id)): Path<(String, String)>,
    Json(request): Json<ConflictResolveRequest>,
) -> ApiResult {
    let conflict = state
        .store
        .get_conflict(&config_id, &conflict_id)
        .await?
        .ok_or_else(|| ApiError::not_found("conflict"))?;
    if conflict.status != ConflictResolutionStatus::Pending {
        return Err(ApiError::validation("conflict already resolved"));
    }

    let (status, resolved_data) = match request.resolution.as_str() {
        "master" => (
            ConflictResolutionStatus::ResolvedMaster,
            Some(conflict.master_data.clone()),
        ),
        "slave" => (
            ConflictResolutionStatus::ResolvedSlave,
            Some(conflict.slave_data.clone()),
        ),
        "merge" => {
            let merged = request
                .merged_data
                .clone()
                .ok_or_else(|| ApiError::validation("merge resolution requires merged_data"))?;
            (ConflictResolutionStatus::ResolvedMerged, Some(merged))
        }
        "skip" => (ConflictResolutionStatus::Skipped, None),
        other => {
            return Err(ApiError::validation(format!(
                "invalid resolution type: {other}"
            )))
        }
    };

    let resolved = state
        .store
        .resolve_conflict(
            &conflict_id,
            status,
            resolved_data.as_ref(),
            request.resolved_by.as_deref().unwrap_or("admin"),
            request.notes.as_deref(),
        )
        .await?
        .ok_or_else(|| ApiError::validation("conflict already resolved"))?;
    Ok(ok(serde_json::to_value(resolved).unwrap_or_default()))
}

// --- incoming automation webhooks ---

pub async fn n8n_webhook(state: State<AppState>, path: Path<String>) -> ApiResult {
    webhook_trigger(state, path, "n8n").await
}

pub async fn zapier_webhook(state: State<AppState>, path: Path<String>) -> ApiResult {
    webhook_trigger(state, path, "zapier").await
}

pub async fn activepieces_webhook(state: State<AppState>, path: Path<String>) -> ApiResult {
    webhook_trigger(state, path, "activepieces").await
}

pub async fn generic_webhook(state: State<AppState>, path: Path<String>) -> ApiResult {
    webhook_trigger(state, path, "webhook").await
}

async fn webhook_trigger(
    State(state): State<AppState>,
    Path(config_id): Path<String>,
    provider: &str,
) -> ApiResult {
    let result = dispatch_job(&state, &config_id, &format!("webhook:{provider}")).await?;
    let (status, Json(mut body)) = result;
    body["message"] = Value::String(format!("Sync triggered via {provider}"));
    Ok((status, Json(body)))
}
