// The publish compiler: load, transform, package, deliver.
//
// Session discipline: the load phase reads everything it needs through
// short per-query acquisitions and finishes before any outbound network
// call (lazy schema discovery excepted, which is itself the load
// phase's last step). Icon fetches, CSS work, and strategy delivery
// never overlap a held database session. A second short acquisition
// marks the page public only after delivery succeeds.

use anyhow::Result;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{info, instrument, warn};

use crate::cache::CacheLayer;
use crate::errors::FrontbaseError;
use crate::repository::CoreStore;
use crate::schema_cache::SchemaCache;
use crate::settings::SettingsHolder;
use crate::types::{CompiledDatasource, Datasource, Page, TableSchema};

use super::css_bundler::bundle_css_for_page;
use super::enrichment::{bake_component_schema, enrich_binding, SCHEMA_BAKED_TYPES};
use super::icons::IconFetcher;
use super::strategy::create_publish_strategy;
use super::transforms::{
    binding_datasource_id, binding_table_name, collect_icons, find_datasource, inject_icon_svg,
    merge_styles, normalize_binding_location, process_children, remove_nulls,
};

/// Shared handles for the publish pipeline.
#[derive(Clone)]
pub struct PublishContext {
    pub store: CoreStore,
    pub cache: CacheLayer,
    pub settings: SettingsHolder,
}

/// What the caller gets back from a publish.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PublishOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

/// Everything the transform phase needs, materialized before any
/// network I/O.
pub struct BundleInputs {
    pub page: Page,
    pub datasources: Vec<Datasource>,
    pub schema_index: HashMap<String, HashMap<String, TableSchema>>,
}

/// Load the page, the active datasources, and every cached schema the
/// page references; missing tables are discovered lazily, one table at
/// a time. A table that cannot be discovered is logged and skipped, and
/// the component renders unenriched.
#[instrument(skip(ctx))]
pub async fn load_bundle_inputs(
    ctx: &PublishContext,
    page_id: &str,
) -> Result<BundleInputs, FrontbaseError> {
    let page = ctx
        .store
        .get_page(page_id)
        .await
        .map_err(FrontbaseError::Fatal)?
        .ok_or_else(|| FrontbaseError::NotFound(format!("page {page_id}")))?;

    let datasources = ctx
        .store
        .list_active_datasources()
        .await
        .map_err(FrontbaseError::Fatal)?;

    let schema_cache = SchemaCache::new(ctx.store.clone(), ctx.cache.clone());
    let mut schema_index: HashMap<String, HashMap<String, TableSchema>> = HashMap::new();
    for ds in &datasources {
        let entries = schema_cache
            .get_all_cached_schemas(&ds.id)
            .await
            .map_err(FrontbaseError::Fatal)?;
        schema_index.insert(ds.id.clone(), entries.into_iter().collect());
    }

    // Lazy discovery for referenced tables the cache has never seen.
    let referenced = referenced_tables(&page.layout_data, &datasources);
    for (ds_id, table) in referenced {
        let known = schema_index
            .get(&ds_id)
            .map(|tables| tables.contains_key(&table))
            .unwrap_or(false);
        if known {
            continue;
        }
        let Some(ds) = datasources.iter().find(|d| d.id == ds_id) else {
            continue;
        };
        match schema_cache.discover_single_table(ds, &table).await {
            Ok(schema) => {
                schema_index.entry(ds_id).or_default().insert(table, schema);
            }
            Err(e) => {
                warn!("Schema discovery for {table} failed; component stays unenriched: {e}");
            }
        }
    }

    Ok(BundleInputs {
        page,
        datasources,
        schema_index,
    })
}

/// Tables the page's bindings reference, for lazy discovery.
fn referenced_tables(
    layout_data: &Value,
    datasources: &[Datasource],
) -> HashSet<(String, String)> {
    let mut out = HashSet::new();
    let content = layout_data
        .get("content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    fn walk(
        component: &Value,
        datasources: &[Datasource],
        out: &mut HashSet<(String, String)>,
    ) {
        let normalized = normalize_binding_location(component);
        if let Some(binding) = normalized.get("binding").and_then(Value::as_object) {
            let ds_id = binding_datasource_id(binding)
                .or_else(|| datasources.first().map(|d| d.id.clone()));
            if let (Some(ds_id), Some(table)) = (ds_id, binding_table_name(binding)) {
                out.insert((ds_id, table));
            }
        }
        if let Some(props) = normalized.get("props").and_then(Value::as_object) {
            let table = props
                .get("tableName")
                .or_else(|| props.get("table_name"))
                .and_then(Value::as_str);
            let ds_id = props
                .get("dataSourceId")
                .or_else(|| props.get("datasourceId"))
                .or_else(|| props.get("datasource_id"))
                .and_then(Value::as_str);
            if let (Some(ds_id), Some(table)) = (ds_id, table) {
                out.insert((ds_id.to_string(), table.to_string()));
            }
        }
        if let Some(children) = normalized.get("children").and_then(Value::as_array) {
            for child in children {
                walk(child, datasources, out);
            }
        }
    }

    for component in &content {
        walk(component, datasources, &mut out);
    }
    out
}

/// Convert one component for publishing: normalize the binding, merge
/// styles, enrich with request specs, bake schema for Form/InfoList,
/// recurse into children, scrub nulls.
pub fn convert_component(
    component: &Value,
    datasources: &[Datasource],
    schema_index: &HashMap<String, HashMap<String, TableSchema>>,
) -> Value {
    let result = normalize_binding_location(component);
    let result = merge_styles(&result);
    let Value::Object(mut result) = result else {
        return result;
    };

    if let Some(binding) = result.get("binding").and_then(Value::as_object).cloned() {
        let ds_id = binding_datasource_id(&binding);
        if let Some(datasource) = find_datasource(datasources, ds_id.as_deref()) {
            let empty = HashMap::new();
            let tables = schema_index.get(&datasource.id).unwrap_or(&empty);
            let component_id = result.get("id").and_then(Value::as_str).map(String::from);
            let mut enriched =
                enrich_binding(&binding, datasource, tables, component_id.as_deref());

            // The edge's table renderer keys off columnOrder.
            if let Some(columns) = enriched.get("columns").cloned() {
                if columns.as_array().map(|a| !a.is_empty()).unwrap_or(false) {
                    enriched.insert("columnOrder".to_string(), columns);
                }
            }
            result.insert("binding".to_string(), Value::Object(enriched));
        }
    }

    let component_type = result
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if SCHEMA_BAKED_TYPES.contains(&component_type.as_str()) {
        bake_component_schema(&mut result, schema_index);
    }

    let with_children = process_children(&Value::Object(result), |child| {
        convert_component(child, datasources, schema_index)
    });

    remove_nulls(&with_children)
}

/// Enrich a layout in place; used by the publish pipeline and by the
/// live public-page endpoint so SSR always sees fresh request specs.
pub fn enrich_layout(
    layout_data: &Value,
    datasources: &[Datasource],
    schema_index: &HashMap<String, HashMap<String, TableSchema>>,
) -> Value {
    let mut layout = layout_data.as_object().cloned().unwrap_or_default();
    for key in ["content", "components"] {
        if let Some(Value::Array(components)) = layout.get(key) {
            let converted: Vec<Value> = components
                .iter()
                .map(|c| convert_component(c, datasources, schema_index))
                .collect();
            layout.insert(key.to_string(), Value::Array(converted));
        }
    }
    if !layout.contains_key("root") {
        layout.insert("root".to_string(), json!({}));
    }
    Value::Object(layout)
}

/// Produce the compiled page payload: transformed layout, pre-rendered
/// icons, tree-shaken CSS, reduced datasource bundle, next version.
#[instrument(skip(ctx, inputs), fields(page = %inputs.page.slug))]
pub async fn compile_page(ctx: &PublishContext, inputs: &BundleInputs) -> Result<Value> {
    let page = &inputs.page;
    let layout = enrich_layout(&page.layout_data, &inputs.datasources, &inputs.schema_index);

    // Icon pre-rendering: collect names, batch-fetch SVGs, inject.
    let mut icon_names = BTreeSet::new();
    collect_icons(&layout, &mut icon_names);
    let layout = if icon_names.is_empty() {
        layout
    } else {
        info!("Collecting icons for page: {:?}", icon_names);
        let fetcher = IconFetcher::new(ctx.cache.clone());
        let svgs = fetcher.fetch_batch(&icon_names).await;
        inject_icon_svg(&layout, &svgs)
    };

    let content = layout
        .get("content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let css_bundle = bundle_css_for_page(&ctx.cache, &content).await;
    info!("CSS bundle generated: {} bytes", css_bundle.len());

    let compiled_datasources: Vec<Value> = inputs
        .datasources
        .iter()
        .map(|ds| {
            serde_json::to_value(CompiledDatasource::from_datasource(ds))
                .unwrap_or(Value::Null)
        })
        .collect();

    let version = page.published_version + 1;
    let payload = json!({
        "id": page.id,
        "slug": page.slug,
        "name": page.name,
        "title": page.title,
        "description": page.description,
        "layoutData": layout,
        "seoData": page.seo_data,
        "datasources": if compiled_datasources.is_empty() { Value::Null } else { Value::Array(compiled_datasources) },
        "cssBundle": css_bundle,
        "version": version,
        "publishedAt": chrono::Utc::now().to_rfc3339(),
        "isPublic": page.is_public,
        "isHomepage": page.is_homepage,
    });

    Ok(remove_nulls(&payload))
}

/// Full publish: load, compile, deliver via the configured strategy,
/// then flip the page public and sync branding settings.
#[instrument(skip(ctx))]
pub async fn publish_page(
    ctx: &PublishContext,
    page_id: &str,
) -> Result<PublishOutcome, FrontbaseError> {
    // Phase 1: store reads. Finished before any network I/O.
    let inputs = load_bundle_inputs(ctx, page_id).await?;
    let page_name = inputs.page.name.clone();

    // Phase 2: heavy I/O with no store involvement.
    let payload = compile_page(ctx, &inputs)
        .await
        .map_err(FrontbaseError::Fatal)?;
    let version = payload.get("version").and_then(Value::as_i64).unwrap_or(1);

    let strategy = create_publish_strategy()?;
    let result = strategy.publish_page(&payload, true).await?;

    // Phase 3: a second short store session records the outcome.
    ctx.store
        .mark_page_published(page_id, version)
        .await
        .map_err(FrontbaseError::Fatal)?;

    let branding = ctx
        .store
        .load_project_settings()
        .await
        .unwrap_or_default()
        .unwrap_or_default();
    // Store read is complete; the settings push happens session-free.
    strategy
        .sync_settings(&json!({
            "faviconUrl": branding.favicon_url,
            "logoUrl": branding.logo_url,
            "siteName": branding.site_name,
            "siteDescription": branding.site_description,
            "appUrl": branding.app_url,
        }))
        .await;

    Ok(PublishOutcome {
        success: true,
        message: format!("Page '{page_name}' published successfully"),
        preview_url: result.preview_url,
        version: result.version.or(Some(version)),
    })
}

/// Serialize a page the way the edge expects it, with live enrichment.
pub fn serialize_page_for_edge(
    page: &Page,
    datasources: &[Datasource],
    schema_index: &HashMap<String, HashMap<String, TableSchema>>,
) -> Value {
    let layout = enrich_layout(&page.layout_data, datasources, schema_index);
    let payload = json!({
        "id": page.id,
        "slug": page.slug,
        "name": page.name,
        "title": page.title,
        "description": page.description,
        "layoutData": layout,
        "seoData": page.seo_data,
        "isPublic": page.is_public,
        "isHomepage": page.is_homepage,
        "version": page.published_version,
    });
    remove_nulls(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DatasourceKind, FkDef};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

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
            service_key: Some("secret-service-key".into()),
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
        let mut index = HashMap::new();
        index.insert("ds1".to_string(), tables);
        index
    }

    #[test]
    fn data_table_component_gets_request_and_column_order() {
        let component = json!({
            "id": "c1",
            "type": "DataTable",
            "binding": {
                "datasource_id": "ds1",
                "table_name": "institutions",
                "columns": ["name", "countries.country"],
                "pagination": {"enabled": true, "page_size": 20}
            }
        });
        let out = convert_component(&component, &[datasource()], &schema_index());
        let binding = out["binding"].as_object().unwrap();
        assert!(binding.contains_key("dataRequest"));
        assert_eq!(binding["columnOrder"], json!(["name", "countries.country"]));
        assert!(binding["dataRequest"]["url"]
            .as_str()
            .unwrap()
            .ends_with("/rest/v1/rpc/frontbase_get_rows"));
    }

    #[test]
    fn missing_datasource_id_falls_back_to_first_registered() {
        let component = json!({
            "id": "c1",
            "type": "DataTable",
            "binding": {"table_name": "institutions", "columns": ["name"]}
        });
        let out = convert_component(&component, &[datasource()], &schema_index());
        assert_eq!(out["binding"]["datasourceId"], json!("ds1"));
    }

    #[test]
    fn conversion_recurses_into_children_and_scrubs_nulls() {
        let component = json!({
            "id": "row",
            "type": "Container",
            "visibility": null,
            "children": [{
                "id": "c1",
                "type": "DataTable",
                "props": {"binding": {"datasource_id": "ds1", "table_name": "institutions",
                                       "columns": ["name"], "sorting": null}}
            }]
        });
        let out = convert_component(&component, &[datasource()], &schema_index());
        assert!(out.get("visibility").is_none());
        let child = &out["children"][0];
        // binding lifted to root and enriched
        assert!(child["binding"].get("dataRequest").is_some());
        assert!(child["binding"].get("sorting").is_none());
    }

    #[test]
    fn compiled_datasources_never_carry_secrets() {
        let ds = datasource();
        let compiled = serde_json::to_value(CompiledDatasource::from_datasource(&ds)).unwrap();
        let rendered = compiled.to_string();
        assert!(!rendered.contains("secret-service-key"));
        assert_eq!(compiled["secretEnvVar"], json!("DS_MAIN_API_KEY"));
        assert_eq!(compiled["anonKey"], json!("anon"));
        assert_eq!(compiled["url"], json!("https://proj.supabase.co"));
    }

    #[test]
    fn referenced_tables_found_through_props_and_bindings() {
        let ds = datasource();
        let layout = json!({
            "content": [
                {"type": "DataTable", "binding": {"datasource_id": "ds1", "table_name": "institutions"}},
                {"type": "Form", "props": {"tableName": "people", "dataSourceId": "ds1"}},
                {"type": "Container", "children": [
                    {"type": "DataTable", "props": {"binding": {"tableName": "countries"}}}
                ]}
            ]
        });
        let refs = referenced_tables(&layout, &[ds]);
        assert!(refs.contains(&("ds1".to_string(), "institutions".to_string())));
        assert!(refs.contains(&("ds1".to_string(), "people".to_string())));
        // fallback to the first datasource for the unlabeled binding
        assert!(refs.contains(&("ds1".to_string(), "countries".to_string())));
    }

    #[test]
    fn enrich_layout_handles_legacy_components_key() {
        let layout = json!({
            "components": [{"id": "c1", "type": "Text"}]
        });
        let out = enrich_layout(&layout, &[datasource()], &schema_index());
        assert!(out.get("components").is_some());
        assert_eq!(out["root"], json!({}));
    }
}
