// End-to-end tests for the publish compiler's transform pipeline:
// binding enrichment, request-spec generation, styles merging, and
// null scrubbing, exercised through convert_component.

use std::collections::HashMap;

use chrono::Utc;
use frontbase::publish::compiler::convert_component;
use frontbase::types::{ColumnDef, Datasource, DatasourceKind, FkDef, TableSchema};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn supabase_datasource() -> Datasource {
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
        service_key: Some("service-role-secret".into()),
        anon_key: Some("anon-key".into()),
        table_prefix: "wp_".into(),
        active: true,
        last_tested_at: None,
        last_test_success: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn text_column(name: &str) -> ColumnDef {
    ColumnDef {
        name: name.into(),
        data_type: "text".into(),
        nullable: true,
        primary_key: false,
        default: None,
        is_foreign: false,
        foreign_table: None,
        foreign_column: None,
    }
}

fn schema_index() -> HashMap<String, HashMap<String, TableSchema>> {
    let mut tables = HashMap::new();
    tables.insert(
        "institutions".to_string(),
        TableSchema {
            columns: vec![text_column("name"), text_column("country_id")],
            foreign_keys: vec![FkDef {
                constrained_columns: vec!["country_id".into()],
                referred_table: "countries".into(),
                referred_columns: vec!["id".into()],
            }],
        },
    );
    let mut index = HashMap::new();
    index.insert("ds1".to_string(), tables);
    index
}

fn data_table_component() -> Value {
    json!({
        "id": "table-1",
        "type": "DataTable",
        "binding": {
            "datasource_id": "ds1",
            "table_name": "institutions",
            "columns": ["name", "countries.country"],
            "pagination": {"enabled": true, "page_size": 20}
        }
    })
}

#[test]
fn minimal_supabase_data_table_publish() {
    let out = convert_component(&data_table_component(), &[supabase_datasource()], &schema_index());
    let request = &out["binding"]["dataRequest"];

    assert!(request["url"]
        .as_str()
        .unwrap()
        .ends_with("/rest/v1/rpc/frontbase_get_rows"));
    assert_eq!(request["method"], json!("POST"));
    assert_eq!(
        request["body"]["columns"],
        json!("\"institutions\".\"name\", \"countries\".\"country\" AS \"countries.country\"")
    );
    assert_eq!(
        request["body"]["joins"],
        json!([{
            "type": "left",
            "table": "countries",
            "on": "\"institutions\".\"country_id\" = \"countries\".\"id\""
        }])
    );
    assert_eq!(request["body"]["sort_dir"], json!("asc"));
    assert_eq!(request["body"]["page"], json!(1));
    assert_eq!(request["body"]["page_size"], json!(20));
    assert_eq!(request["body"]["filters"], json!([]));
    assert_eq!(request["resultPath"], json!("rows"));

    // pagination context survives for subsequent-page rebuilds
    assert_eq!(request["queryConfig"]["tableName"], json!("institutions"));
    assert_eq!(request["queryConfig"]["pageSize"], json!(20));
}

#[test]
fn filter_options_are_baked_per_dropdown() {
    let mut component = data_table_component();
    component["binding"]["frontendFilters"] = json!([
        {"id": "f1", "column": "countries.country", "filterType": "dropdown", "label": "Country"},
        {"id": "f2", "column": "name", "filterType": "text"}
    ]);

    let out = convert_component(&component, &[supabase_datasource()], &schema_index());
    let filters = out["binding"]["frontendFilters"].as_array().unwrap();
    assert_eq!(filters.len(), 2);

    let f1 = &filters[0];
    assert_eq!(
        f1["optionsDataRequest"]["body"],
        json!({"target_table": "countries", "target_col": "country"})
    );
    assert!(f1["optionsDataRequest"]["url"]
        .as_str()
        .unwrap()
        .ends_with("/rpc/frontbase_get_distinct_values"));

    let f2 = &filters[1];
    assert!(f2.get("optionsDataRequest").is_none());
}

#[test]
fn null_sorting_key_is_absent_after_conversion() {
    let component = json!({
        "id": "c1",
        "type": "DataTable",
        "binding": {
            "datasource_id": "ds1",
            "table_name": "institutions",
            "columns": ["name"],
            "sorting": null,
            "pagination": {"enabled": true, "page_size": 20}
        }
    });
    let out = convert_component(&component, &[supabase_datasource()], &schema_index());
    let binding = out["binding"].as_object().unwrap();
    assert!(!binding.contains_key("sorting"));
    assert!(binding.contains_key("dataRequest"));
    assert_eq!(
        binding["pagination"],
        json!({"enabled": true, "page_size": 20})
    );
}

#[test]
fn styles_merge_prefers_styles_data_values() {
    let component = json!({
        "id": "c1",
        "type": "Text",
        "styles": {"color": "red", "margin": "4px"},
        "stylesData": {"values": {"color": "blue", "padding": "2px"}}
    });
    let out = convert_component(&component, &[supabase_datasource()], &schema_index());
    let values = out["styles"]["values"].as_object().unwrap();
    assert_eq!(values["color"], json!("blue"));
    assert_eq!(values["margin"], json!("4px"));
    assert_eq!(values["padding"], json!("2px"));
    assert!(out.get("stylesData").is_none());
}

#[test]
fn conversion_is_deterministic_for_identical_input() {
    // Publishing twice with no changes must yield byte-identical
    // component trees; only version/publishedAt differ at the bundle
    // level, and neither is produced here.
    let ds = [supabase_datasource()];
    let index = schema_index();
    let a = convert_component(&data_table_component(), &ds, &index);
    let b = convert_component(&data_table_component(), &ds, &index);
    assert_eq!(a, b);
}

#[test]
fn binding_inside_props_is_lifted_and_enriched() {
    let component = json!({
        "id": "c1",
        "type": "DataTable",
        "props": {
            "binding": {
                "dataSourceId": "ds1",
                "tableName": "institutions",
                "columns": ["name"]
            },
            "theme": "compact"
        }
    });
    let out = convert_component(&component, &[supabase_datasource()], &schema_index());
    assert!(out["binding"]["dataRequest"].is_object());
    assert_eq!(out["props"], json!({"theme": "compact"}));
}

#[test]
fn form_components_carry_baked_schema_and_mirrors() {
    let component = json!({
        "id": "form-1",
        "type": "Form",
        "props": {"tableName": "institutions", "dataSourceId": "ds1"}
    });
    let out = convert_component(&component, &[supabase_datasource()], &schema_index());

    let binding = out["binding"].as_object().unwrap();
    let columns = binding["columns"].as_array().unwrap();
    assert_eq!(columns.len(), 2);
    assert_eq!(columns[0]["name"], json!("name"));
    assert_eq!(
        binding["foreignKeys"],
        json!([{
            "column": "country_id",
            "referencedTable": "countries",
            "referencedColumn": "id"
        }])
    );

    let props = out["props"].as_object().unwrap();
    assert_eq!(props["_tableName"], json!("institutions"));
    assert_eq!(props["_dataSourceId"], json!("ds1"));
    assert_eq!(props["_columns"].as_array().unwrap().len(), 2);
}
