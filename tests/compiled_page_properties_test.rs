// Invariant checks over converted component trees: no reachable nulls,
// options requests wherever a dropdown/multiselect filter appears, and
// style values forming a superset of both inputs.

use std::collections::HashMap;

use chrono::Utc;
use frontbase::publish::compiler::convert_component;
use frontbase::types::{Datasource, DatasourceKind, TableSchema};
use serde_json::{json, Value};

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

fn schema_index() -> HashMap<String, HashMap<String, TableSchema>> {
    let mut tables = HashMap::new();
    tables.insert("events".to_string(), TableSchema::default());
    let mut index = HashMap::new();
    index.insert("ds1".to_string(), tables);
    index
}

fn assert_no_nulls(value: &Value, path: &str) {
    match value {
        Value::Null => panic!("literal null reachable at {path}"),
        Value::Object(map) => {
            for (k, v) in map {
                assert_no_nulls(v, &format!("{path}.{k}"));
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                assert_no_nulls(v, &format!("{path}[{i}]"));
            }
        }
        _ => {}
    }
}

fn messy_tree() -> Value {
    json!({
        "id": "root",
        "type": "Container",
        "visibility": null,
        "styles": {"gap": "8px"},
        "stylesData": {"values": {"gap": "16px", "direction": null}},
        "children": [
            {
                "id": "t1",
                "type": "DataTable",
                "binding": {
                    "datasource_id": "ds1",
                    "table_name": "events",
                    "columns": ["title", "venue"],
                    "sorting": null,
                    "frontendFilters": [
                        {"id": "f1", "column": "category", "filterType": "multiselect", "label": null},
                        {"id": "f2", "column": "title", "filterType": "text"},
                        {"id": "f3", "column": "venues.city", "filterType": "dropdown"}
                    ]
                }
            },
            {
                "id": "txt",
                "type": "Text",
                "props": {"content": "hello", "footnote": null}
            }
        ]
    })
}

#[test]
fn no_reachable_value_is_literal_null() {
    let out = convert_component(&messy_tree(), &[datasource()], &schema_index());
    assert_no_nulls(&out, "$");
}

#[test]
fn every_option_filter_carries_a_complete_options_request() {
    let out = convert_component(&messy_tree(), &[datasource()], &schema_index());
    let filters = out["children"][0]["binding"]["frontendFilters"]
        .as_array()
        .unwrap();

    for filter in filters {
        let filter_type = filter["filterType"].as_str().unwrap_or_default();
        let column = filter["column"].as_str().unwrap_or_default();
        let has_options = filter.get("optionsDataRequest").is_some();

        if matches!(filter_type, "dropdown" | "multiselect") && !column.is_empty() {
            assert!(has_options, "filter {filter:?} is missing optionsDataRequest");
            let body = &filter["optionsDataRequest"]["body"];
            assert!(body["target_table"].is_string());
            assert!(body["target_col"].is_string());
        } else {
            assert!(!has_options, "filter {filter:?} should not carry options");
        }
    }

    // dotted column resolves to the related table
    assert_eq!(
        filters[2]["optionsDataRequest"]["body"],
        json!({"target_table": "venues", "target_col": "city"})
    );
    // plain column resolves to the binding's table
    assert_eq!(
        filters[0]["optionsDataRequest"]["body"],
        json!({"target_table": "events", "target_col": "category"})
    );
}

#[test]
fn merged_style_values_are_a_superset_of_both_inputs() {
    let out = convert_component(&messy_tree(), &[datasource()], &schema_index());
    let values = out["styles"]["values"].as_object().unwrap();
    // base key survives, stylesData wins the collision
    assert_eq!(values["gap"], json!("16px"));
}

#[test]
fn secrets_never_appear_in_converted_output() {
    let mut ds = datasource();
    ds.service_key = Some("super-secret-service-key".into());
    ds.password = Some("db-password".into());
    let out = convert_component(&messy_tree(), &[ds], &schema_index());
    let rendered = out.to_string();
    assert!(!rendered.contains("super-secret-service-key"));
    assert!(!rendered.contains("db-password"));
}
