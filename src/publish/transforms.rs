// Pure transformations over the component tree. No side effects; each
// function returns a new value.

use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::types::Datasource;

/// Move `props.binding` to the component root. The root binding is the
/// single source of truth downstream.
pub fn normalize_binding_location(component: &Value) -> Value {
    let Some(obj) = component.as_object() else {
        return component.clone();
    };
    let mut result = obj.clone();

    let binding = result
        .get("props")
        .and_then(Value::as_object)
        .and_then(|props| props.get("binding"))
        .cloned();

    if let Some(binding) = binding {
        result.insert("binding".to_string(), binding);
        let mut props = result
            .get("props")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        props.remove("binding");
        if props.is_empty() {
            result.remove("props");
        } else {
            result.insert("props".to_string(), Value::Object(props));
        }
    }
    Value::Object(result)
}

/// Merge template defaults (`styles`) with user edits
/// (`stylesData.values`), user edits winning, and emit the canonical
/// `{activeProperties, values, stylingMode}` shape. `stylesData` is
/// removed from the output.
pub fn merge_styles(component: &Value) -> Value {
    let Some(obj) = component.as_object() else {
        return component.clone();
    };
    let mut result = obj.clone();

    let existing = result.get("styles").cloned().unwrap_or(Value::Null);
    let base_values: Map<String, Value> = match &existing {
        Value::Object(map) if map.contains_key("values") => map
            .get("values")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    if let Some(styles_data) = result.remove("stylesData") {
        let user_values: Map<String, Value> = match &styles_data {
            Value::Object(map) if map.contains_key("values") => map
                .get("values")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };

        let mut merged = base_values;
        for (k, v) in user_values {
            merged.insert(k, v);
        }

        let active = styles_data
            .get("activeProperties")
            .cloned()
            .unwrap_or_else(|| {
                Value::Array(merged.keys().cloned().map(Value::String).collect())
            });
        let mode = styles_data
            .get("stylingMode")
            .cloned()
            .unwrap_or_else(|| Value::String("visual".to_string()));

        let mut styles = Map::new();
        styles.insert("activeProperties".to_string(), active);
        styles.insert("values".to_string(), Value::Object(merged));
        styles.insert("stylingMode".to_string(), mode);
        result.insert("styles".to_string(), Value::Object(styles));
    } else if !base_values.is_empty() {
        let already_canonical = matches!(&existing, Value::Object(map) if map.contains_key("values"));
        if !already_canonical {
            let mut styles = Map::new();
            styles.insert(
                "activeProperties".to_string(),
                Value::Array(base_values.keys().cloned().map(Value::String).collect()),
            );
            styles.insert("values".to_string(), Value::Object(base_values));
            styles.insert(
                "stylingMode".to_string(),
                Value::String("visual".to_string()),
            );
            result.insert("styles".to_string(), Value::Object(styles));
        }
    }

    Value::Object(result)
}

/// Apply `f` to every child, recursively handled by the caller.
pub fn process_children<F>(component: &Value, f: F) -> Value
where
    F: Fn(&Value) -> Value,
{
    let Some(obj) = component.as_object() else {
        return component.clone();
    };
    let mut result = obj.clone();
    if let Some(Value::Array(children)) = result.get("children") {
        if !children.is_empty() {
            let processed: Vec<Value> = children.iter().map(&f).collect();
            result.insert("children".to_string(), Value::Array(processed));
        }
    }
    Value::Object(result)
}

/// Recursively drop literal-null entries. Downstream validators accept
/// absent optionals but reject null.
pub fn remove_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), remove_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .filter(|v| !v.is_null())
                .map(remove_nulls)
                .collect(),
        ),
        other => other.clone(),
    }
}

/// The datasource id under any of the spellings the builder has used.
pub fn binding_datasource_id(binding: &Map<String, Value>) -> Option<String> {
    ["datasourceId", "datasource_id", "dataSourceId"]
        .iter()
        .find_map(|key| binding.get(*key).and_then(Value::as_str))
        .map(String::from)
}

/// The bound table under either spelling.
pub fn binding_table_name(binding: &Map<String, Value>) -> Option<String> {
    ["tableName", "table_name"]
        .iter()
        .find_map(|key| binding.get(*key).and_then(Value::as_str))
        .map(String::from)
}

/// Find by id, falling back to the first registered datasource.
pub fn find_datasource<'a>(
    datasources: &'a [Datasource],
    id: Option<&str>,
) -> Option<&'a Datasource> {
    if let Some(id) = id {
        if let Some(ds) = datasources.iter().find(|d| d.id == id) {
            return Some(ds);
        }
    }
    datasources.first()
}

/// Collect every icon name referenced anywhere in the tree: `icon` /
/// `iconName` string values, including inside filter configs.
pub fn collect_icons(value: &Value, icons: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if (key == "icon" || key == "iconName") && v.is_string() {
                    let name = v.as_str().unwrap_or_default();
                    if !name.is_empty() {
                        icons.insert(name.to_string());
                    }
                }
                collect_icons(v, icons);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_icons(item, icons);
            }
        }
        _ => {}
    }
}

/// Inject `iconSvg` next to every resolved icon reference.
pub fn inject_icon_svg(value: &Value, svg_map: &std::collections::HashMap<String, String>) -> Value {
    match value {
        Value::Object(map) => {
            let mut result = Map::new();
            for (key, v) in map {
                result.insert(key.clone(), inject_icon_svg(v, svg_map));
            }
            let icon_name = map
                .get("icon")
                .or_else(|| map.get("iconName"))
                .and_then(Value::as_str);
            if let Some(svg) = icon_name.and_then(|name| svg_map.get(name)) {
                result.insert("iconSvg".to_string(), Value::String(svg.clone()));
            }
            Value::Object(result)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| inject_icon_svg(v, svg_map)).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn binding_lifts_from_props_to_root() {
        let component = json!({
            "id": "c1",
            "type": "DataTable",
            "props": {"binding": {"tableName": "posts"}, "color": "red"}
        });
        let out = normalize_binding_location(&component);
        assert_eq!(out["binding"], json!({"tableName": "posts"}));
        assert_eq!(out["props"], json!({"color": "red"}));

        // props containing only the binding disappear entirely
        let lone = json!({"id": "c2", "props": {"binding": {}}});
        let out = normalize_binding_location(&lone);
        assert!(out.get("props").is_none());
    }

    #[test]
    fn styles_merge_user_edits_over_defaults() {
        let component = json!({
            "id": "c1",
            "styles": {"values": {"color": "red", "margin": "4px"}},
            "stylesData": {
                "values": {"color": "blue"},
                "stylingMode": "css",
                "activeProperties": ["color"]
            }
        });
        let out = merge_styles(&component);
        assert!(out.get("stylesData").is_none());
        assert_eq!(out["styles"]["values"]["color"], json!("blue"));
        assert_eq!(out["styles"]["values"]["margin"], json!("4px"));
        assert_eq!(out["styles"]["stylingMode"], json!("css"));
        assert_eq!(out["styles"]["activeProperties"], json!(["color"]));
    }

    #[test]
    fn legacy_flat_styles_become_canonical() {
        let component = json!({"id": "c1", "styles": {"color": "red"}});
        let out = merge_styles(&component);
        assert_eq!(out["styles"]["values"]["color"], json!("red"));
        assert_eq!(out["styles"]["activeProperties"], json!(["color"]));
        assert_eq!(out["styles"]["stylingMode"], json!("visual"));
    }

    #[test]
    fn active_properties_default_to_merged_keys() {
        let component = json!({
            "id": "c1",
            "styles": {"margin": "4px"},
            "stylesData": {"values": {"color": "blue"}}
        });
        let out = merge_styles(&component);
        let active: Vec<String> = out["styles"]["activeProperties"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert!(active.contains(&"margin".to_string()));
        assert!(active.contains(&"color".to_string()));
    }

    #[test]
    fn null_scrub_reaches_nested_structures() {
        let value = json!({
            "datasource_id": "x",
            "table_name": "t",
            "sorting": null,
            "pagination": {"enabled": true, "page_size": 20, "cursor": null},
            "filters": [{"id": "f1", "label": null}, null]
        });
        let out = remove_nulls(&value);
        assert_eq!(
            out,
            json!({
                "datasource_id": "x",
                "table_name": "t",
                "pagination": {"enabled": true, "page_size": 20},
                "filters": [{"id": "f1"}]
            })
        );
    }

    #[test]
    fn datasource_id_spellings_all_resolve() {
        for key in ["datasourceId", "datasource_id", "dataSourceId"] {
            let binding = json!({key: "ds1"}).as_object().unwrap().clone();
            assert_eq!(binding_datasource_id(&binding), Some("ds1".to_string()));
        }
        let none = json!({}).as_object().unwrap().clone();
        assert_eq!(binding_datasource_id(&none), None);
    }

    #[test]
    fn icons_collected_from_props_and_filters() {
        let component = json!({
            "props": {"icon": "home", "nested": [{"iconName": "search"}]},
            "binding": {"frontendFilters": [{"id": "f1", "icon": "filter"}]},
            "children": [{"props": {"icon": "home"}}]
        });
        let mut icons = BTreeSet::new();
        collect_icons(&component, &mut icons);
        let collected: Vec<&str> = icons.iter().map(String::as_str).collect();
        assert_eq!(collected, vec!["filter", "home", "search"]);
    }

    #[test]
    fn icon_svg_injected_beside_references() {
        let component = json!({"props": {"icon": "home"}});
        let mut svgs = std::collections::HashMap::new();
        svgs.insert("home".to_string(), "<svg>home</svg>".to_string());
        let out = inject_icon_svg(&component, &svgs);
        assert_eq!(out["props"]["iconSvg"], json!("<svg>home</svg>"));
    }
}
