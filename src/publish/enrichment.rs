// Binding enrichment: attach the main data request, per-filter options
// requests, and (for Form/InfoList) the baked table schema.

use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::types::{Datasource, TableSchema};

use super::data_request::{compute_data_request, generate_options_request};
use super::transforms::{binding_datasource_id, binding_table_name, remove_nulls};

/// Components whose binding embeds the full column and FK lists so the
/// edge renders without schema lookups.
pub const SCHEMA_BAKED_TYPES: [&str; 2] = ["Form", "InfoList"];

/// Enrich a binding with its data request while preserving every
/// original field. Returns a new binding.
pub fn enrich_binding(
    binding: &Map<String, Value>,
    datasource: &Datasource,
    tables: &HashMap<String, TableSchema>,
    component_id: Option<&str>,
) -> Map<String, Value> {
    let mut enriched = binding.clone();

    if let Some(id) = component_id {
        enriched.insert("componentId".to_string(), Value::String(id.to_string()));
    }
    if binding_datasource_id(&enriched).is_none() {
        enriched.insert(
            "datasourceId".to_string(),
            Value::String(datasource.id.clone()),
        );
    }

    if let Some(request) = compute_data_request(&mut enriched, datasource, tables) {
        enriched.insert("dataRequest".to_string(), request);
    }

    let table_name = binding_table_name(&enriched).unwrap_or_default();
    if let Some(filters) = enriched
        .get("frontendFilters")
        .or_else(|| enriched.get("frontend_filters"))
        .and_then(Value::as_array)
        .cloned()
    {
        if !filters.is_empty() {
            let enriched_filters = enrich_filters(&filters, &table_name, datasource);
            let key = if enriched.contains_key("frontendFilters") {
                "frontendFilters"
            } else {
                "frontend_filters"
            };
            enriched.insert(key.to_string(), Value::Array(enriched_filters));
        }
    }

    // Absent beats null for every optional the edge validates.
    match remove_nulls(&Value::Object(enriched)) {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Attach `optionsDataRequest` to every dropdown/multiselect filter
/// with a column; all filters are preserved either way.
pub fn enrich_filters(
    filters: &[Value],
    table_name: &str,
    datasource: &Datasource,
) -> Vec<Value> {
    filters
        .iter()
        .map(|filter| {
            let Some(obj) = filter.as_object() else {
                return filter.clone();
            };
            let filter_type = obj
                .get("filterType")
                .or_else(|| obj.get("filter_type"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let column = obj.get("column").and_then(Value::as_str).unwrap_or_default();

            if !matches!(filter_type, "dropdown" | "multiselect") || column.is_empty() {
                return filter.clone();
            }

            let mut enriched = obj.clone();
            enriched.insert(
                "optionsDataRequest".to_string(),
                generate_options_request(column, table_name, datasource),
            );
            Value::Object(enriched)
        })
        .collect()
}

/// Foreign keys in the shape the edge validates:
/// `{column, referencedTable, referencedColumn}`.
pub fn edge_foreign_keys(schema: &TableSchema) -> Vec<Value> {
    let mut out = Vec::new();
    for fk in &schema.foreign_keys {
        for (i, column) in fk.constrained_columns.iter().enumerate() {
            let referenced_column = fk
                .referred_columns
                .get(i)
                .cloned()
                .unwrap_or_else(|| "id".to_string());
            out.push(serde_json::json!({
                "column": column,
                "referencedTable": fk.referred_table,
                "referencedColumn": referenced_column,
            }));
        }
    }
    out
}

/// Bake the table's columns and FKs into a Form/InfoList component.
///
/// Config may live in props (fresh from the builder) or in the binding
/// (possibly stale from a previous publish); props win. Everything is
/// mirrored under `props._*` keys to survive downstream schema
/// filtering.
pub fn bake_component_schema(
    component: &mut Map<String, Value>,
    tables_by_datasource: &HashMap<String, HashMap<String, TableSchema>>,
) {
    let props = component
        .get("props")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let binding = component
        .get("binding")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let table_name = lookup_str(&props, &["tableName", "table_name"])
        .or_else(|| lookup_str(component, &["tableName"]))
        .or_else(|| lookup_str(&binding, &["tableName", "table_name"]));
    let ds_id = lookup_str(&props, &["dataSourceId", "datasourceId", "datasource_id"])
        .or_else(|| lookup_str(component, &["dataSourceId"]))
        .or_else(|| lookup_str(&binding, &["dataSourceId", "datasourceId", "datasource_id"]));

    let (Some(table_name), Some(ds_id)) = (table_name, ds_id) else {
        debug!("Form/InfoList without tableName or dataSourceId; schema bake skipped");
        return;
    };

    let schema = tables_by_datasource
        .get(&ds_id)
        .and_then(|tables| tables.get(&table_name));

    let columns: Vec<Value> = schema
        .map(|s| {
            s.columns
                .iter()
                .filter_map(|c| serde_json::to_value(c).ok())
                .collect()
        })
        .unwrap_or_default();
    let foreign_keys: Vec<Value> = schema.map(edge_foreign_keys).unwrap_or_default();

    let field_overrides = binding
        .get("fieldOverrides")
        .or_else(|| props.get("fieldOverrides"))
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    let field_order = binding
        .get("fieldOrder")
        .or_else(|| props.get("fieldOrder"))
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));

    let mut new_binding = binding;
    new_binding.insert("tableName".to_string(), Value::String(table_name.clone()));
    new_binding.insert("dataSourceId".to_string(), Value::String(ds_id.clone()));
    if field_overrides
        .as_object()
        .map(|o| !o.is_empty())
        .unwrap_or(false)
    {
        new_binding.insert("fieldOverrides".to_string(), field_overrides.clone());
    }
    if field_order.as_array().map(|a| !a.is_empty()).unwrap_or(false) {
        new_binding.insert("fieldOrder".to_string(), field_order.clone());
    }
    if !columns.is_empty() {
        new_binding.insert("columns".to_string(), Value::Array(columns.clone()));
    }
    if !foreign_keys.is_empty() {
        new_binding.insert("foreignKeys".to_string(), Value::Array(foreign_keys.clone()));
    }
    component.insert("binding".to_string(), Value::Object(new_binding));

    let mut new_props = props;
    new_props.insert("_columns".to_string(), Value::Array(columns));
    new_props.insert("_foreignKeys".to_string(), Value::Array(foreign_keys));
    new_props.insert("_tableName".to_string(), Value::String(table_name));
    new_props.insert("_dataSourceId".to_string(), Value::String(ds_id));
    new_props.insert("_fieldOverrides".to_string(), field_overrides);
    new_props.insert("_fieldOrder".to_string(), field_order);
    component.insert("props".to_string(), Value::Object(new_props));
}

fn lookup_str(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnDef, DatasourceKind, FkDef};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn datasource() -> Datasource {
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
            anon_key: Some("anon".into()),
            table_prefix: "wp_".into(),
            active: true,
            last_tested_at: None,
            last_test_success: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn schema_index() -> HashMap<String, TableSchema> {
        let mut tables = HashMap::new();
        tables.insert(
            "institutions".to_string(),
            TableSchema {
                columns: vec![ColumnDef {
                    name: "name".into(),
                    data_type: "text".into(),
                    nullable: true,
                    primary_key: false,
                    default: None,
                    is_foreign: false,
                    foreign_table: None,
                    foreign_column: None,
                }],
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
    fn dropdown_filters_get_options_requests_text_filters_do_not() {
        let binding = json!({
            "datasource_id": "ds1",
            "table_name": "institutions",
            "columns": ["name", "countries.country"],
            "pagination": {"enabled": true, "page_size": 20},
            "frontendFilters": [
                {"id": "f1", "column": "countries.country", "filterType": "dropdown", "label": "Country"},
                {"id": "f2", "column": "name", "filterType": "text"}
            ]
        })
        .as_object()
        .unwrap()
        .clone();

        let enriched = enrich_binding(&binding, &datasource(), &schema_index(), Some("c1"));
        let filters = enriched["frontendFilters"].as_array().unwrap();

        let f1 = filters[0].as_object().unwrap();
        let options = f1["optionsDataRequest"].as_object().unwrap();
        assert_eq!(
            options["body"],
            json!({"target_table": "countries", "target_col": "country"})
        );
        assert!(options["url"]
            .as_str()
            .unwrap()
            .ends_with("/rpc/frontbase_get_distinct_values"));

        let f2 = filters[1].as_object().unwrap();
        assert!(!f2.contains_key("optionsDataRequest"));

        assert!(enriched.contains_key("dataRequest"));
        assert_eq!(enriched["componentId"], json!("c1"));
    }

    #[test]
    fn enrichment_scrubs_nulls_and_backfills_datasource_id() {
        let binding = json!({
            "table_name": "institutions",
            "columns": ["name"],
            "sorting": null,
            "pagination": {"enabled": true, "page_size": 20}
        })
        .as_object()
        .unwrap()
        .clone();

        let enriched = enrich_binding(&binding, &datasource(), &schema_index(), None);
        assert!(!enriched.contains_key("sorting"));
        assert_eq!(enriched["datasourceId"], json!("ds1"));
        assert!(enriched.contains_key("dataRequest"));
        // the request itself survived scrubbing
        assert_eq!(enriched["dataRequest"]["body"]["page_size"], json!(20));
    }

    #[test]
    fn schema_bake_fills_binding_and_props_mirrors() {
        let mut component = json!({
            "id": "form1",
            "type": "Form",
            "props": {"tableName": "institutions", "dataSourceId": "ds1",
                      "fieldOrder": ["name"]}
        })
        .as_object()
        .unwrap()
        .clone();

        let mut by_ds = HashMap::new();
        by_ds.insert("ds1".to_string(), schema_index());
        bake_component_schema(&mut component, &by_ds);

        let binding = component["binding"].as_object().unwrap();
        assert_eq!(binding["tableName"], json!("institutions"));
        assert_eq!(binding["dataSourceId"], json!("ds1"));
        assert_eq!(binding["columns"].as_array().unwrap().len(), 1);
        assert_eq!(
            binding["foreignKeys"],
            json!([{
                "column": "country_id",
                "referencedTable": "countries",
                "referencedColumn": "id"
            }])
        );
        assert_eq!(binding["fieldOrder"], json!(["name"]));

        let props = component["props"].as_object().unwrap();
        assert_eq!(props["_tableName"], json!("institutions"));
        assert_eq!(props["_dataSourceId"], json!("ds1"));
        assert_eq!(props["_columns"].as_array().unwrap().len(), 1);
        assert_eq!(props["_fieldOrder"], json!(["name"]));
    }

    #[test]
    fn schema_bake_without_table_is_a_noop() {
        let mut component = json!({"id": "form1", "type": "Form", "props": {}})
            .as_object()
            .unwrap()
            .clone();
        bake_component_schema(&mut component, &HashMap::new());
        assert!(!component.contains_key("binding"));
    }

    #[test]
    fn binding_columns_present_iff_cache_has_them() {
        // A datasource present in the index but with no entry for the
        // table bakes empty lists, omitted from the binding.
        let mut component = json!({
            "id": "form1",
            "type": "InfoList",
            "props": {"tableName": "missing", "dataSourceId": "ds1"}
        })
        .as_object()
        .unwrap()
        .clone();
        let mut by_ds = HashMap::new();
        by_ds.insert("ds1".to_string(), schema_index());
        bake_component_schema(&mut component, &by_ds);

        let binding = component["binding"].as_object().unwrap();
        assert!(!binding.contains_key("columns"));
        let props = component["props"].as_object().unwrap();
        assert_eq!(props["_columns"], json!([]));
    }
}
