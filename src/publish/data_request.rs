// Pre-computed HTTP request specs for data bindings. Generated at
// publish time so the edge can execute them verbatim, with no adapter
// logic of its own.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::types::{DataRequest, Datasource, DatasourceKind, TableSchema};

use super::transforms::binding_table_name;

pub const ROWS_RPC: &str = "frontbase_get_rows";
pub const DISTINCT_RPC: &str = "frontbase_get_distinct_values";

const ANON_KEY_PLACEHOLDER: &str = "{{SUPABASE_ANON_KEY}}";

/// Build the main data request for a binding, or `None` when the
/// datasource kind has no HTTP execution path.
///
/// May write back into the binding: a `*` column list is resolved to the
/// schema's explicit columns so the edge renderer sees a concrete list.
pub fn compute_data_request(
    binding: &mut Map<String, Value>,
    datasource: &Datasource,
    tables: &HashMap<String, TableSchema>,
) -> Option<Value> {
    match datasource.kind {
        DatasourceKind::Supabase => compute_supabase_request(binding, datasource, tables),
        DatasourceKind::Neon => compute_vendor_sql_request(binding, "neon", tables),
        other => {
            debug!("no data-request generator for datasource kind {other}");
            None
        }
    }
}

fn compute_supabase_request(
    binding: &mut Map<String, Value>,
    datasource: &Datasource,
    tables: &HashMap<String, TableSchema>,
) -> Option<Value> {
    let table_name = binding_table_name(binding)?;

    let mut column_order = binding_columns(binding);
    if column_order.is_empty() || column_order == ["*"] {
        if let Some(schema) = tables.get(&table_name) {
            let resolved: Vec<String> = schema.columns.iter().map(|c| c.name.clone()).collect();
            if !resolved.is_empty() {
                // Write the explicit list back so the edge gets it too.
                let as_value =
                    Value::Array(resolved.iter().cloned().map(Value::String).collect());
                binding.insert("columns".to_string(), as_value.clone());
                binding.insert("columnOrder".to_string(), as_value);
                column_order = resolved;
            }
        }
        if column_order.is_empty() {
            column_order = vec!["*".to_string()];
        }
    }

    let columns_str = sql_projection(&table_name, &column_order);
    let joins = joins_for_columns(&table_name, &column_order, tables);

    let (sort_col, sort_dir) = sorting_of(binding);
    let page_size = page_size_of(binding);

    let ds_url = datasource.api_url.clone().unwrap_or_default();
    let rpc_url = format!("{}/rest/v1/rpc/{ROWS_RPC}", ds_url.trim_end_matches('/'));

    let query_config = json!({
        "useRpc": true,
        "rpcUrl": rpc_url,
        "tableName": table_name,
        "columns": columns_str,
        "joins": joins,
        "pageSize": page_size,
        "sortColumn": sort_col,
        "sortDirection": sort_dir,
        "searchColumns": binding.get("searchColumns").cloned().unwrap_or(json!([])),
        "frontendFilters": frontend_filters_of(binding),
    });

    let request = DataRequest {
        url: rpc_url,
        method: "POST".to_string(),
        headers: auth_headers(datasource.anon_key.as_deref()),
        body: Some(json!({
            "table_name": table_name,
            "columns": columns_str,
            "joins": joins,
            "sort_col": sort_col,
            "sort_dir": sort_dir,
            "page": 1,
            "page_size": page_size,
            "filters": [],
        })),
        result_path: "rows".to_string(),
        flatten_relations: Some(false),
        query_config: Some(query_config),
    };
    serde_json::to_value(request).ok()
}

/// The request for fetching a dropdown/multiselect filter's distinct
/// options. Dotted columns resolve to their related table.
pub fn generate_options_request(
    column: &str,
    table_name: &str,
    datasource: &Datasource,
) -> Value {
    let (target_table, target_col) = match column.split_once('.') {
        Some((related, col)) => (related.to_string(), col.to_string()),
        None => (table_name.to_string(), column.to_string()),
    };

    let ds_url = datasource.api_url.clone().unwrap_or_default();
    let rpc_url = format!(
        "{}/rest/v1/rpc/{DISTINCT_RPC}",
        ds_url.trim_end_matches('/')
    );

    let request = DataRequest {
        url: rpc_url,
        method: "POST".to_string(),
        headers: auth_headers(datasource.anon_key.as_deref()),
        body: Some(json!({
            "target_table": target_table,
            "target_col": target_col,
        })),
        // The distinct RPC returns a bare array.
        result_path: String::new(),
        flatten_relations: None,
        query_config: None,
    };
    serde_json::to_value(request).unwrap_or(Value::Null)
}

/// SQL projection with case-preserving quoting: base columns as
/// `"t"."c"`, dotted related columns as `"rel"."c" AS "rel.c"`, a `*`
/// entry as `"t".*` once.
fn sql_projection(table_name: &str, columns: &[String]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(columns.len());
    let mut star_added = false;
    for col in columns {
        if let Some((related, c)) = col.split_once('.') {
            parts.push(format!("\"{related}\".\"{c}\" AS \"{col}\""));
        } else if col != "*" {
            parts.push(format!("\"{table_name}\".\"{col}\""));
        } else if !star_added {
            parts.push(format!("\"{table_name}\".*"));
            star_added = true;
        }
    }
    if parts.is_empty() {
        parts.push(format!("\"{table_name}\".*"));
    }
    parts.join(", ")
}

/// One left join per distinct related table referenced by a dotted
/// column, resolved against the cached FK graph. Columns whose table
/// has no FK edge stay in the projection but get no join.
fn joins_for_columns(
    table_name: &str,
    columns: &[String],
    tables: &HashMap<String, TableSchema>,
) -> Vec<Value> {
    let mut joined: Vec<String> = Vec::new();
    let mut joins = Vec::new();
    let schema = tables.get(table_name);

    for col in columns {
        let Some((related, _)) = col.split_once('.') else {
            continue;
        };
        if joined.iter().any(|t| t == related) {
            continue;
        }
        let Some(schema) = schema else { continue };
        let Some(fk) = schema
            .foreign_keys
            .iter()
            .find(|fk| fk.referred_table == related)
        else {
            debug!("no FK from {table_name} to {related}; join skipped");
            continue;
        };
        let source_col = fk
            .constrained_columns
            .first()
            .cloned()
            .unwrap_or_default();
        let target_col = fk
            .referred_columns
            .first()
            .cloned()
            .unwrap_or_else(|| "id".to_string());
        joins.push(json!({
            "type": "left",
            "table": related,
            "on": format!(
                "\"{table_name}\".\"{source_col}\" = \"{related}\".\"{target_col}\""
            ),
        }));
        joined.push(related.to_string());
    }
    joins
}

fn compute_vendor_sql_request(
    binding: &mut Map<String, Value>,
    vendor: &str,
    tables: &HashMap<String, TableSchema>,
) -> Option<Value> {
    let table_name = binding_table_name(binding)?;

    let mut join_sql = String::new();
    if let Some(schema) = tables.get(&table_name) {
        for fk in &schema.foreign_keys {
            let (Some(col), Some(ref_col)) =
                (fk.constrained_columns.first(), fk.referred_columns.first())
            else {
                continue;
            };
            join_sql.push_str(&format!(
                " LEFT JOIN {ref_table} ON {table_name}.{col} = {ref_table}.{ref_col}",
                ref_table = fk.referred_table,
            ));
        }
    }
    let sql = format!("SELECT {table_name}.* FROM {table_name}{join_sql} LIMIT 100");
    sql_over_http_request(vendor, &sql)
}

/// Vendor HTTP-SQL envelopes. URLs and auth carry `{{ENV}}` placeholders
/// the edge substitutes at render time.
pub fn sql_over_http_request(vendor: &str, sql: &str) -> Option<Value> {
    match vendor {
        "neon" => Some(json!({
            "url": "{{NEON_HTTP_URL}}/sql",
            "method": "POST",
            "headers": {
                "Authorization": "Bearer {{NEON_API_KEY}}",
                "Content-Type": "application/json",
            },
            "body": {"query": sql, "params": []},
            "resultPath": "rows",
            "flattenRelations": false,
        })),
        "planetscale" => Some(json!({
            "url": "{{PLANETSCALE_HTTP_URL}}/query",
            "method": "POST",
            "headers": {
                "Authorization": "{{PLANETSCALE_AUTH}}",
                "Content-Type": "application/json",
            },
            "body": {"query": sql},
            "resultPath": "rows",
            "flattenRelations": false,
        })),
        "turso" => Some(json!({
            "url": "{{TURSO_HTTP_URL}}/v2/pipeline",
            "method": "POST",
            "headers": {
                "Authorization": "Bearer {{TURSO_AUTH_TOKEN}}",
                "Content-Type": "application/json",
            },
            "body": {"statements": [{"q": sql}]},
            "resultPath": "results[0].rows",
            "flattenRelations": false,
        })),
        _ => None,
    }
}

fn auth_headers(anon_key: Option<&str>) -> Map<String, Value> {
    let key = anon_key
        .filter(|k| !k.is_empty())
        .unwrap_or(ANON_KEY_PLACEHOLDER);
    let mut headers = Map::new();
    headers.insert("apikey".to_string(), Value::String(key.to_string()));
    headers.insert(
        "Authorization".to_string(),
        Value::String(format!("Bearer {key}")),
    );
    headers.insert(
        "Content-Type".to_string(),
        Value::String("application/json".to_string()),
    );
    headers
}

fn binding_columns(binding: &Map<String, Value>) -> Vec<String> {
    ["columns", "columnOrder"]
        .iter()
        .find_map(|key| binding.get(*key).and_then(Value::as_array))
        .map(|cols| {
            cols.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn sorting_of(binding: &Map<String, Value>) -> (Value, String) {
    let sorting = binding.get("sorting").and_then(Value::as_object);
    let enabled = sorting
        .and_then(|s| s.get("enabled"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let sort_col = if enabled {
        sorting
            .and_then(|s| s.get("column"))
            .cloned()
            .unwrap_or(Value::Null)
    } else {
        Value::Null
    };
    let sort_dir = sorting
        .and_then(|s| s.get("direction"))
        .and_then(Value::as_str)
        .unwrap_or("asc")
        .to_string();
    (sort_col, sort_dir)
}

fn page_size_of(binding: &Map<String, Value>) -> i64 {
    let pagination = binding.get("pagination").and_then(Value::as_object);
    let enabled = pagination
        .and_then(|p| p.get("enabled"))
        .and_then(Value::as_bool)
        .unwrap_or(true);
    if !enabled {
        return 1000;
    }
    pagination
        .and_then(|p| {
            p.get("pageSize")
                .or_else(|| p.get("page_size"))
                .and_then(Value::as_i64)
        })
        .unwrap_or(20)
}

fn frontend_filters_of(binding: &Map<String, Value>) -> Value {
    binding
        .get("frontendFilters")
        .or_else(|| binding.get("frontend_filters"))
        .cloned()
        .unwrap_or(json!([]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FkDef;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn supabase_ds() -> Datasource {
        Datasource {
            id: "ds1".into(),
            name: "Main".into(),
            kind: DatasourceKind::Supabase,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            api_url: Some("https://proj.supabase.co".into()),
            service_key: None,
            anon_key: Some("anon-123".into()),
            table_prefix: "wp_".into(),
            active: true,
            last_tested_at: None,
            last_test_success: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn institutions_schema() -> HashMap<String, TableSchema> {
        let mut tables = HashMap::new();
        tables.insert(
            "institutions".to_string(),
            TableSchema {
                columns: vec![],
                foreign_keys: vec![FkDef {
                    constrained_columns: vec!["country_id".into()],
                    referred_table: "countries".into(),
                    referred_columns: vec!["id".into()],
                }],
            },
        );
        tables
    }

    #[test]
    fn supabase_data_table_request_matches_contract() {
        let mut binding = serde_json::json!({
            "datasource_id": "ds1",
            "table_name": "institutions",
            "columns": ["name", "countries.country"],
            "pagination": {"enabled": true, "page_size": 20}
        })
        .as_object()
        .unwrap()
        .clone();

        let request =
            compute_data_request(&mut binding, &supabase_ds(), &institutions_schema()).unwrap();

        assert!(request["url"]
            .as_str()
            .unwrap()
            .ends_with("/rest/v1/rpc/frontbase_get_rows"));
        assert_eq!(
            request["body"],
            serde_json::json!({
                "table_name": "institutions",
                "columns": "\"institutions\".\"name\", \"countries\".\"country\" AS \"countries.country\"",
                "joins": [{
                    "type": "left",
                    "table": "countries",
                    "on": "\"institutions\".\"country_id\" = \"countries\".\"id\""
                }],
                "sort_col": null,
                "sort_dir": "asc",
                "page": 1,
                "page_size": 20,
                "filters": []
            })
        );
        assert_eq!(request["resultPath"], "rows");
        assert_eq!(request["queryConfig"]["pageSize"], 20);
        assert_eq!(request["queryConfig"]["tableName"], "institutions");
    }

    #[test]
    fn pagination_disabled_means_bulk_page_size() {
        let mut binding = serde_json::json!({
            "table_name": "institutions",
            "columns": ["name"],
            "pagination": {"enabled": false}
        })
        .as_object()
        .unwrap()
        .clone();
        let request =
            compute_data_request(&mut binding, &supabase_ds(), &institutions_schema()).unwrap();
        assert_eq!(request["body"]["page_size"], 1000);
    }

    #[test]
    fn star_columns_resolve_from_schema_and_write_back() {
        let mut tables = institutions_schema();
        tables.get_mut("institutions").unwrap().columns = vec![
            crate::types::ColumnDef {
                name: "id".into(),
                data_type: "integer".into(),
                nullable: false,
                primary_key: true,
                default: None,
                is_foreign: false,
                foreign_table: None,
                foreign_column: None,
            },
            crate::types::ColumnDef {
                name: "name".into(),
                data_type: "text".into(),
                nullable: true,
                primary_key: false,
                default: None,
                is_foreign: false,
                foreign_table: None,
                foreign_column: None,
            },
        ];

        let mut binding = serde_json::json!({"table_name": "institutions"})
            .as_object()
            .unwrap()
            .clone();
        let request = compute_data_request(&mut binding, &supabase_ds(), &tables).unwrap();
        assert_eq!(
            request["body"]["columns"],
            serde_json::json!("\"institutions\".\"id\", \"institutions\".\"name\"")
        );
        assert_eq!(binding["columns"], serde_json::json!(["id", "name"]));
        assert_eq!(binding["columnOrder"], serde_json::json!(["id", "name"]));
    }

    #[test]
    fn options_request_splits_dotted_columns() {
        let ds = supabase_ds();
        let request = generate_options_request("countries.country", "institutions", &ds);
        assert!(request["url"]
            .as_str()
            .unwrap()
            .ends_with("/rpc/frontbase_get_distinct_values"));
        assert_eq!(
            request["body"],
            serde_json::json!({"target_table": "countries", "target_col": "country"})
        );

        let plain = generate_options_request("name", "institutions", &ds);
        assert_eq!(
            plain["body"],
            serde_json::json!({"target_table": "institutions", "target_col": "name"})
        );
    }

    #[test]
    fn missing_anon_key_emits_placeholders() {
        let mut ds = supabase_ds();
        ds.anon_key = None;
        let request = generate_options_request("name", "t", &ds);
        assert_eq!(request["headers"]["apikey"], "{{SUPABASE_ANON_KEY}}");
        assert_eq!(
            request["headers"]["Authorization"],
            "Bearer {{SUPABASE_ANON_KEY}}"
        );
    }

    #[test]
    fn neon_request_ships_sql_envelope() {
        let mut binding = serde_json::json!({"table_name": "institutions"})
            .as_object()
            .unwrap()
            .clone();
        let request =
            compute_vendor_sql_request(&mut binding, "neon", &institutions_schema()).unwrap();
        assert_eq!(request["url"], "{{NEON_HTTP_URL}}/sql");
        let sql = request["body"]["query"].as_str().unwrap();
        assert!(sql.contains("LEFT JOIN countries ON institutions.country_id = countries.id"));
        assert!(sql.ends_with("LIMIT 100"));
    }

    #[test]
    fn vendor_envelopes_cover_the_http_sql_family() {
        let ps = sql_over_http_request("planetscale", "SELECT 1").unwrap();
        assert_eq!(ps["url"], "{{PLANETSCALE_HTTP_URL}}/query");
        let turso = sql_over_http_request("turso", "SELECT 1").unwrap();
        assert_eq!(turso["resultPath"], "results[0].rows");
        assert!(sql_over_http_request("oracle", "SELECT 1").is_none());
    }
}
