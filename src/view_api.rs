// View REST handlers: CRUD plus record reads, counts, writes, and the
// webhook trigger.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::adapters::create_adapter;
use crate::datasource_api::require_datasource;
use crate::http_server::AppState;
use crate::http_types::{created, ok, ApiError, ApiResult};
use crate::repository::views::{NewView, ViewPatch};

#[derive(Debug, Deserialize)]
pub struct ViewCreateRequest {
    pub name: String,
    pub description: Option<String>,
    pub target_table: String,
    pub filters: Option<Value>,
    pub field_mappings: Option<Value>,
    pub linked_views: Option<Value>,
    pub visible_columns: Option<Vec<String>>,
    pub pinned_columns: Option<Vec<String>>,
    pub column_order: Option<Vec<String>>,
    pub webhooks: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ViewUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub target_table: Option<String>,
    pub filters: Option<Value>,
    pub field_mappings: Option<Value>,
    pub linked_views: Option<Value>,
    pub visible_columns: Option<Vec<String>>,
    pub pinned_columns: Option<Vec<String>>,
    pub column_order: Option<Vec<String>>,
    pub webhooks: Option<Value>,
}

pub async fn create_view(
    State(state): State<AppState>,
    Path(datasource_id): Path<String>,
    Json(request): Json<ViewCreateRequest>,
) -> ApiResult {
    require_datasource(&state, &datasource_id).await?;
    if state.store.view_name_exists(&request.name, None).await? {
        return Err(ApiError::validation(format!(
            "a view with the name '{}' already exists",
            request.name
        )));
    }
    let view = state
        .store
        .create_view(NewView {
            name: request.name,
            description: request.description,
            datasource_id,
            target_table: request.target_table,
            filters: request.filters,
            field_mappings: request.field_mappings,
            linked_views: request.linked_views,
            visible_columns: request.visible_columns,
            pinned_columns: request.pinned_columns,
            column_order: request.column_order,
            webhooks: request.webhooks,
        })
        .await?;
    Ok(created(serde_json::to_value(view).unwrap_or_default()))
}

pub async fn list_views(
    State(state): State<AppState>,
    Path(datasource_id): Path<String>,
) -> ApiResult {
    require_datasource(&state, &datasource_id).await?;
    let views = state.store.list_views(&datasource_id).await?;
    Ok(ok(serde_json::to_value(views).unwrap_or_default()))
}

pub async fn get_view(State(state): State<AppState>, Path(view_id): Path<String>) -> ApiResult {
    let view = state
        .store
        .get_view(&view_id)
        .await?
        .ok_or_else(|| ApiError::not_found("view"))?;
    Ok(ok(serde_json::to_value(view).unwrap_or_default()))
}

pub async fn update_view(
    State(state): State<AppState>,
    Path(view_id): Path<String>,
    Json(request): Json<ViewUpdateRequest>,
) -> ApiResult {
    if let Some(name) = &request.name {
        if state.store.view_name_exists(name, Some(&view_id)).await? {
            return Err(ApiError::validation(format!(
                "a view with the name '{name}' already exists"
            )));
        }
    }
    let updated = state
        .store
        .update_view(
            &view_id,
            ViewPatch {
                name: request.name,
                description: request.description,
                target_table: request.target_table,
                filters: request.filters,
                field_mappings: request.field_mappings,
                linked_views: request.linked_views,
                visible_columns: request.visible_columns,
                pinned_columns: request.pinned_columns,
                column_order: request.column_order,
                webhooks: request.webhooks,
            },
        )
        .await?
        .ok_or_else(|| ApiError::not_found("view"))?;
    Ok(ok(serde_json::to_value(updated).unwrap_or_default()))
}

pub async fn delete_view(State(state): State<AppState>, Path(view_id): Path<String>) -> ApiResult {
    if !state.store.delete_view(&view_id).await? {
        return Err(ApiError::not_found("view"));
    }
    Ok((StatusCode::NO_CONTENT, Json(Value::Null)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ViewPageParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn get_view_records(
    State(state): State<AppState>,
    Path(view_id): Path<String>,
    Query(params): Query<ViewPageParams>,
) -> ApiResult {
    let page = state
        .views()
        .read_view(&view_id, params.page.unwrap_or(1), params.limit.unwrap_or(10))
        .await?;
    Ok(ok(serde_json::to_value(page).unwrap_or_default()))
}

pub async fn get_view_count(
    State(state): State<AppState>,
    Path(view_id): Path<String>,
) -> ApiResult {
    let (view, datasource_name, total) = state.views().count_view(&view_id).await?;
    Ok(ok(json!({
        "view_id": view.id,
        "view_name": view.name,
        "total_records": total,
        "target_table": view.target_table,
        "datasource_name": datasource_name,
        "timestamp_utc": chrono::Utc::now().to_rfc3339(),
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct KeyColumnParams {
    pub key_column: Option<String>,
}

pub async fn create_view_record(
    State(state): State<AppState>,
    Path(view_id): Path<String>,
    Json(record): Json<Map<String, Value>>,
) -> ApiResult {
    write_view_record(&state, &view_id, record, "id").await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"success": true, "message": "Record created successfully"})),
    ))
}

pub async fn patch_view_record(
    State(state): State<AppState>,
    Path(view_id): Path<String>,
    Query(params): Query<KeyColumnParams>,
    Json(record): Json<Map<String, Value>>,
) -> ApiResult {
    let key_column = params.key_column.as_deref().unwrap_or("id").to_string();
    write_view_record(&state, &view_id, record, &key_column).await?;
    Ok((
        StatusCode::OK,
        Json(json!({"success": true, "message": "Record patched successfully"})),
    ))
}

async fn write_view_record(
    state: &AppState,
    view_id: &str,
    record: Map<String, Value>,
    key_column: &str,
) -> Result<(), ApiError> {
    if record.is_empty() {
        return Err(ApiError::validation("no record data provided"));
    }
    let view = state
        .store
        .get_view(view_id)
        .await?
        .ok_or_else(|| ApiError::not_found("view"))?;
    let datasource = require_datasource(state, &view.datasource_id).await?;

    let adapter = create_adapter(&datasource, &state.cache).await?;
    let result = adapter
        .upsert_record(&view.target_table, &record, key_column)
        .await;
    let _ = adapter.close().await;
    result?;
    Ok(())
}

pub async fn trigger_view(
    State(state): State<AppState>,
    Path(view_id): Path<String>,
    Json(payload): Json<Map<String, Value>>,
) -> ApiResult {
    let (transformed, webhook_count) = state.views().trigger_view(&view_id, payload).await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": format!("Processed and routed to {webhook_count} webhooks"),
            "data": transformed,
        })),
    ))
}
