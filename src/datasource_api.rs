// Datasource REST handlers: registration (with eager schema
// discovery), connection testing, table data reads, records, distinct
// values, relationships, and cross-table search.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::adapters::{create_adapter, DataAdapter, ReadQuery, RelatedSpec};
use crate::errors::{classify_connection_error, ConnectionKind};
use crate::filtering::FilterExpr;
use crate::http_server::AppState;
use crate::http_types::{created, ok, ApiError, ApiResult};
use crate::observability::with_trace_id;
use crate::repository::{DatasourcePatch, NewDatasource};
use crate::types::{Datasource, DatasourceKind, Record};

#[derive(Debug, Deserialize)]
pub struct DatasourceCreateRequest {
    pub name: String,
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub anon_key: Option<String>,
    pub table_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DatasourceUpdateRequest {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub anon_key: Option<String>,
    pub table_prefix: Option<String>,
    pub active: Option<bool>,
}

pub async fn create_datasource(
    State(state): State<AppState>,
    Json(request): Json<DatasourceCreateRequest>,
) -> ApiResult {
    with_trace_id("create_datasource", async move {
        let kind: DatasourceKind = request
            .kind
            .parse()
            .map_err(|_| ApiError::validation(format!("unknown datasource type: {}", request.kind)))?;
        if request.name.trim().is_empty() {
            return Err(ApiError::validation("datasource name is required"));
        }
        if state.store.datasource_name_exists(&request.name).await? {
            return Err(ApiError::validation(format!(
                "a datasource named '{}' already exists",
                request.name
            )));
        }

        let datasource = state
            .store
            .create_datasource(NewDatasource {
                name: request.name,
                kind,
                host: request.host,
                port: request.port,
                database: request.database,
                username: request.username,
                password: request.password,
                api_url: request.api_url,
                api_key: request.api_key,
                anon_key: request.anon_key,
                table_prefix: request.table_prefix,
            })
            .await?;

        // Eager discovery populates the schema cache; registration still
        // succeeds if the backend is slow to answer.
        let discovery = match state.schema_cache().discover_all_schemas(&datasource).await {
            Ok(summary) => serde_json::to_value(summary).unwrap_or(Value::Null),
            Err(e) => {
                warn!("Eager schema discovery failed for {}: {e:#}", datasource.name);
                Value::Null
            }
        };

        let mut data = serde_json::to_value(&datasource).unwrap_or(Value::Null);
        if !discovery.is_null() {
            data["discovery"] = discovery;
        }
        Ok(created(data))
    })
    .await
}

pub async fn list_datasources(State(state): State<AppState>) -> ApiResult {
    let datasources = state.store.list_datasources().await?;
    Ok(ok(serde_json::to_value(datasources).unwrap_or_default()))
}

pub async fn get_datasource(
    State(state): State<AppState>,
    Path(datasource_id): Path<String>,
) -> ApiResult {
    let datasource = require_datasource(&state, &datasource_id).await?;
    Ok(ok(serde_json::to_value(datasource).unwrap_or_default()))
}

pub async fn update_datasource(
    State(state): State<AppState>,
    Path(datasource_id): Path<String>,
    Json(request): Json<DatasourceUpdateRequest>,
) -> ApiResult {
    if let Some(name) = &request.name {
        let existing = state.store.get_datasource(&datasource_id).await?;
        if existing.as_ref().map(|d| &d.name) != Some(name)
            && state.store.datasource_name_exists(name).await?
        {
            return Err(ApiError::validation(format!(
                "a datasource named '{name}' already exists"
            )));
        }
    }
    let updated = state
        .store
        .update_datasource(
            &datasource_id,
            DatasourcePatch {
                name: request.name,
                host: request.host,
                port: request.port,
                database: request.database,
                username: request.username,
                password: request.password,
                api_url: request.api_url,
                api_key: request.api_key,
                anon_key: request.anon_key,
                table_prefix: request.table_prefix,
                active: request.active,
            },
        )
        .await?
        .ok_or_else(|| ApiError::not_found("datasource"))?;
    Ok(ok(serde_json::to_value(updated).unwrap_or_default()))
}

pub async fn delete_datasource(
    State(state): State<AppState>,
    Path(datasource_id): Path<String>,
) -> ApiResult {
    if !state.store.delete_datasource(&datasource_id).await? {
        return Err(ApiError::not_found("datasource"));
    }
    Ok((StatusCode::NO_CONTENT, Json(Value::Null)))
}

// --- connection testing ---

/// Probe a datasource's connectivity: open, list tables, close. The
/// outcome lands on the datasource row either way.
async fn probe(state: &AppState, datasource: &Datasource) -> (bool, Value) {
    match create_adapter(datasource, &state.cache).await {
        Ok(adapter) => {
            let tables = adapter.list_tables().await;
            let _ = adapter.close().await;
            match tables {
                Ok(tables) => (
                    true,
                    json!({"success": true, "message": "Connection successful", "tables": tables}),
                ),
                Err(e) => (false, failure_body(&e.to_string())),
            }
        }
        Err(e) => {
            let suggestion = e.suggestion();
            let mut body = failure_body(&e.to_string());
            if let Some(s) = suggestion {
                body["suggestion"] = Value::String(s.to_string());
            }
            (false, body)
        }
    }
}

fn failure_body(error: &str) -> Value {
    let mut body = json!({
        "success": false,
        "message": "Connection failed",
        "error": error,
    });
    let kind = classify_connection_error(error);
    if kind != ConnectionKind::Other {
        if let Some(suggestion) = kind.suggestion() {
            body["suggestion"] = Value::String(suggestion.to_string());
        }
    }
    body
}

pub async fn test_datasource(
    State(state): State<AppState>,
    Path(datasource_id): Path<String>,
) -> ApiResult {
    info!("Testing connection for saved datasource: {datasource_id}");
    let datasource = require_datasource(&state, &datasource_id).await?;
    let (success, body) = probe(&state, &datasource).await;
    state
        .store
        .mark_datasource_tested(&datasource_id, success)
        .await?;
    Ok((StatusCode::OK, Json(body)))
}

pub async fn test_raw_datasource(
    State(state): State<AppState>,
    Json(request): Json<DatasourceCreateRequest>,
) -> ApiResult {
    info!("Testing raw connection for new datasource: {}", request.name);
    let kind: DatasourceKind = request
        .kind
        .parse()
        .map_err(|_| ApiError::validation(format!("unknown datasource type: {}", request.kind)))?;
    let transient = transient_datasource(kind, &request);
    let (_, body) = probe(&state, &transient).await;
    Ok((StatusCode::OK, Json(body)))
}

pub async fn test_datasource_update(
    State(state): State<AppState>,
    Path(datasource_id): Path<String>,
    Json(request): Json<DatasourceUpdateRequest>,
) -> ApiResult {
    info!("Testing connection update for datasource: {datasource_id}");
    let existing = require_datasource(&state, &datasource_id).await?;
    let mut merged = existing.clone();
    if let Some(v) = request.name {
        merged.name = v;
    }
    merged.host = request.host.or(merged.host);
    merged.port = request.port.or(merged.port);
    merged.database = request.database.or(merged.database);
    merged.username = request.username.or(merged.username);
    merged.password = request.password.or(merged.password);
    merged.api_url = request.api_url.or(merged.api_url);
    merged.service_key = request.api_key.or(merged.service_key);
    merged.anon_key = request.anon_key.or(merged.anon_key);
    if let Some(v) = request.table_prefix {
        merged.table_prefix = v;
    }
    let (_, body) = probe(&state, &merged).await;
    Ok((StatusCode::OK, Json(body)))
}

fn transient_datasource(kind: DatasourceKind, request: &DatasourceCreateRequest) -> Datasource {
    Datasource {
        id: "transient".to_string(),
        name: request.name.clone(),
        kind,
        host: request.host.clone(),
        port: request.port,
        database: request.database.clone(),
        username: request.username.clone(),
        password: request.password.clone(),
        api_url: request.api_url.clone(),
        service_key: request.api_key.clone(),
        anon_key: request.anon_key.clone(),
        table_prefix: request.table_prefix.clone().unwrap_or_else(|| "wp_".into()),
        active: true,
        last_tested_at: None,
        last_test_success: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

// --- tables, schema, data ---

pub async fn list_datasource_tables(
    State(state): State<AppState>,
    Path(datasource_id): Path<String>,
) -> ApiResult {
    let datasource = require_datasource(&state, &datasource_id).await?;
    let adapter = create_adapter(&datasource, &state.cache).await?;
    let tables = adapter.list_tables().await;
    let _ = adapter.close().await;
    Ok(ok(json!(tables?)))
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshParams {
    #[serde(default)]
    pub refresh: bool,
}

pub async fn get_table_schema(
    State(state): State<AppState>,
    Path((datasource_id, table)): Path<(String, String)>,
    Query(params): Query<RefreshParams>,
) -> ApiResult {
    let datasource = require_datasource(&state, &datasource_id).await?;
    let schema_cache = state.schema_cache();

    let schema = if params.refresh {
        schema_cache.discover_single_table(&datasource, &table).await?
    } else {
        schema_cache.get_schema_or_discover(&datasource, &table).await?
    };
    Ok(ok(serde_json::to_value(schema).unwrap_or_default()))
}

#[derive(Debug, Default, Deserialize)]
pub struct TableDataParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub filters: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub search: Option<String>,
    pub search_cols: Option<String>,
    pub select: Option<String>,
}

pub async fn get_table_data(
    State(state): State<AppState>,
    Path((datasource_id, table)): Path<(String, String)>,
    Query(params): Query<TableDataParams>,
) -> ApiResult {
    let datasource = require_datasource(&state, &datasource_id).await?;

    let filters = params
        .filters
        .as_deref()
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .map(|v| FilterExpr::parse_list(&v))
        .unwrap_or_default();
    let search_cols: Option<Vec<String>> = params
        .search_cols
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok());

    let mut query = ReadQuery {
        columns: None,
        filters,
        limit: params.limit.unwrap_or(50),
        offset: params.offset.unwrap_or(0),
        order_by: params.sort.clone(),
        order_direction: params.order.clone(),
        search: params.search.clone().filter(|s| !s.is_empty()),
        search_columns: search_cols,
    };

    // `select` names related tables: "*,programs(degree_name,level)".
    // FK columns come from the schema cache, never the adapter.
    let related = match params.select.as_deref() {
        Some(select) => resolve_related_specs(&state, &datasource_id, &table, select).await?,
        None => Vec::new(),
    };

    let adapter = create_adapter(&datasource, &state.cache).await?;
    let result: anyhow::Result<(Vec<Record>, i64)> = async {
        let records = if related.is_empty() {
            adapter.read_records(&table, &query).await?
        } else {
            adapter
                .read_records_with_relations(&table, &related, &query)
                .await?
        };
        // The count path ignores search; totals are refined below.
        query.search = None;
        let total = adapter.count_records(&table, &query.filters).await?;
        Ok((records, total))
    }
    .await;
    let _ = adapter.close().await;
    let (records, total) = result?;

    let offset = params.offset.unwrap_or(0);
    let total = total.max(records.len() as i64 + offset);
    let has_more = (offset + records.len() as i64) < total;
    Ok(ok(json!({
        "records": records,
        "total": total,
        "offset": offset,
        "limit": params.limit.unwrap_or(50),
        "has_more": has_more,
        "timestamp_utc": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Parse `table(col,col)` groups from a select expression and resolve
/// each against the cached FK graph.
async fn resolve_related_specs(
    state: &AppState,
    datasource_id: &str,
    table: &str,
    select: &str,
) -> Result<Vec<RelatedSpec>, ApiError> {
    let pattern = regex::Regex::new(r"(\w+)\(([^)]+)\)").expect("static regex");
    let mut requested: Vec<(String, Vec<String>)> = Vec::new();
    for caps in pattern.captures_iter(select) {
        let related_table = caps[1].to_string();
        let columns = caps[2]
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        requested.push((related_table, columns));
    }
    if requested.is_empty() {
        return Ok(Vec::new());
    }

    let schema = state
        .schema_cache()
        .get_cached_schema(datasource_id, table)
        .await?;
    let Some(schema) = schema else {
        warn!("No cached schema for {table}; skipping FK enrichment");
        return Ok(Vec::new());
    };

    let mut specs = Vec::new();
    for (related_table, columns) in requested {
        let fk = schema
            .foreign_keys
            .iter()
            .find(|fk| fk.referred_table == related_table);
        match fk {
            Some(fk) => specs.push(RelatedSpec {
                table: related_table,
                columns,
                fk_col: fk.constrained_columns.first().cloned().unwrap_or_default(),
                ref_col: fk
                    .referred_columns
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "id".to_string()),
            }),
            None => warn!("No FK from {table} to {related_table}; relation skipped"),
        }
    }
    Ok(specs)
}

#[derive(Debug, Deserialize)]
pub struct RecordBody {
    pub data: Map<String, Value>,
    #[serde(default)]
    pub key_column: Option<String>,
}

pub async fn create_table_record(
    State(state): State<AppState>,
    Path((datasource_id, table)): Path<(String, String)>,
    Json(body): Json<RecordBody>,
) -> ApiResult {
    if body.data.is_empty() {
        return Err(ApiError::validation("no data provided"));
    }
    let datasource = require_datasource(&state, &datasource_id).await?;
    let key_column = body.key_column.as_deref().unwrap_or("id");

    let adapter = create_adapter(&datasource, &state.cache).await?;
    let record = adapter.upsert_record(&table, &body.data, key_column).await;
    let _ = adapter.close().await;
    Ok(created(json!({"record": record?})))
}

pub async fn update_table_record(
    State(state): State<AppState>,
    Path((datasource_id, table, record_id)): Path<(String, String, String)>,
    Json(body): Json<RecordBody>,
) -> ApiResult {
    if body.data.is_empty() {
        return Err(ApiError::validation("no data provided"));
    }
    let datasource = require_datasource(&state, &datasource_id).await?;
    let key_column = body.key_column.as_deref().unwrap_or("id").to_string();
    let key_value = Value::String(record_id.clone());

    let adapter = create_adapter(&datasource, &state.cache).await?;
    let result: anyhow::Result<Record> = async {
        let existing = adapter
            .read_record_by_key(&table, &key_column, &key_value)
            .await?
            .ok_or_else(|| anyhow::Error::from(crate::errors::FrontbaseError::NotFound("record".into())))?;
        let mut merged = existing;
        for (k, v) in &body.data {
            merged.insert(k.clone(), v.clone());
        }
        merged.insert(key_column.clone(), key_value.clone());
        Ok(adapter.upsert_record(&table, &merged, &key_column).await?)
    }
    .await;
    let _ = adapter.close().await;
    Ok(ok(json!({"record": result?})))
}

pub async fn get_distinct_values(
    State(state): State<AppState>,
    Path((datasource_id, table, column)): Path<(String, String, String)>,
) -> ApiResult {
    let datasource = require_datasource(&state, &datasource_id).await?;
    let adapter = create_adapter(&datasource, &state.cache).await?;
    let values = adapter.get_distinct_values(&table, &column, 100).await;
    let _ = adapter.close().await;
    Ok(ok(json!(values?)))
}

pub async fn get_relationships(
    State(state): State<AppState>,
    Path(datasource_id): Path<String>,
    Query(params): Query<RefreshParams>,
) -> ApiResult {
    let datasource = require_datasource(&state, &datasource_id).await?;
    let schema_cache = state.schema_cache();

    if params.refresh {
        schema_cache.refresh_all_schemas(&datasource).await?;
    } else if schema_cache
        .get_all_cached_schemas(&datasource_id)
        .await?
        .is_empty()
    {
        // Relationships over an empty cache mean discovery never ran.
        schema_cache.discover_all_schemas(&datasource).await?;
    }

    let relationships = schema_cache.get_all_relationships(&datasource_id).await?;
    Ok(ok(serde_json::to_value(relationships).unwrap_or_default()))
}

// --- cross-table search ---

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default)]
    pub detailed: bool,
    pub limit: Option<i64>,
}

fn find_matched_fields(record: &Record, query: &str) -> Vec<String> {
    let needle = query.to_lowercase();
    record
        .iter()
        .filter(|(_, v)| !v.is_null())
        .filter(|(_, v)| {
            let rendered = match v {
                Value::String(s) => s.to_lowercase(),
                other => other.to_string().to_lowercase(),
            };
            rendered.contains(&needle)
        })
        .map(|(k, _)| k.clone())
        .collect()
}

fn extract_row_id(record: &Record) -> Value {
    record
        .get("id")
        .cloned()
        .or_else(|| record.values().next().cloned())
        .unwrap_or(Value::Null)
}

async fn search_one_datasource(
    state: &AppState,
    datasource: &Datasource,
    q: &str,
    detailed: bool,
    limit: i64,
) -> anyhow::Result<Vec<Value>> {
    let adapter = create_adapter(datasource, &state.cache).await?;
    let result = search_with_adapter(adapter.as_ref(), datasource, q, detailed, limit).await;
    let _ = adapter.close().await;
    result
}

async fn search_with_adapter(
    adapter: &dyn DataAdapter,
    datasource: &Datasource,
    q: &str,
    detailed: bool,
    limit: i64,
) -> anyhow::Result<Vec<Value>> {
    let tables = adapter.list_tables().await?;
    let mut matches = Vec::new();

    if detailed {
        for table in tables {
            match adapter.search_records(&table, q, limit).await {
                Ok(records) => {
                    for record in records {
                        let matched_fields = find_matched_fields(&record, q);
                        if !matched_fields.is_empty() {
                            matches.push(json!({
                                "table": table,
                                "datasource_id": datasource.id,
                                "datasource_name": datasource.name,
                                "row_id": extract_row_id(&record),
                                "record": record,
                                "matched_fields": matched_fields,
                            }));
                        }
                    }
                }
                Err(e) => warn!("Error searching table {table}: {e}"),
            }
        }
    } else {
        let semaphore = Arc::new(Semaphore::new(10));
        let counts = futures::future::join_all(tables.into_iter().map(|table| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                match adapter.count_search_matches(&table, q).await {
                    Ok(count) if count > 0 => Some((table, count)),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("Error counting in table {table}: {e}");
                        None
                    }
                }
            }
        }))
        .await;
        for (table, count) in counts.into_iter().flatten() {
            matches.push(json!({
                "table": table,
                "datasource_id": datasource.id,
                "datasource_name": datasource.name,
                "count": count,
            }));
        }
    }
    Ok(matches)
}

pub async fn search_datasource(
    State(state): State<AppState>,
    Path(datasource_id): Path<String>,
    Query(params): Query<SearchParams>,
) -> ApiResult {
    let datasource = require_datasource(&state, &datasource_id).await?;
    let matches = search_one_datasource(
        &state,
        &datasource,
        &params.q,
        params.detailed,
        params.limit.unwrap_or(10),
    )
    .await?;
    Ok(ok(Value::Array(matches)))
}

pub async fn search_all_datasources(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult {
    let datasources = state.store.list_datasources().await?;
    let mut all_matches = Vec::new();
    for datasource in datasources {
        match search_one_datasource(
            &state,
            &datasource,
            &params.q,
            params.detailed,
            params.limit.unwrap_or(10),
        )
        .await
        {
            Ok(matches) => all_matches.extend(matches),
            Err(e) => warn!("Skipping search for datasource {}: {e}", datasource.id),
        }
    }
    Ok(ok(Value::Array(all_matches)))
}

pub(crate) async fn require_datasource(
    state: &AppState,
    datasource_id: &str,
) -> Result<Datasource, ApiError> {
    state
        .store
        .get_datasource(datasource_id)
        .await?
        .ok_or_else(|| ApiError::not_found("datasource"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn matched_fields_scan_all_values() {
        let record = json!({"id": 7, "title": "Rust in prod", "views": 120})
            .as_object()
            .unwrap()
            .clone();
        assert_eq!(find_matched_fields(&record, "rust"), vec!["title"]);
        assert_eq!(find_matched_fields(&record, "120"), vec!["views"]);
        assert!(find_matched_fields(&record, "golang").is_empty());
    }

    #[test]
    fn row_id_prefers_id_then_first_value() {
        let with_id = json!({"name": "x", "id": 3}).as_object().unwrap().clone();
        assert_eq!(extract_row_id(&with_id), json!(3));
        let without = json!({"name": "x"}).as_object().unwrap().clone();
        assert_eq!(extract_row_id(&without), json!("x"));
    }
}
