// WordPress REST adapter: the full capability set over /wp-json.
//
// Discovery walks the index, types, and taxonomies endpoints; schemas
// are a hybrid of OPTIONS definitions and one sampled record; filters
// the API cannot express natively are applied client-side over a
// bounded page scan.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::cache::CacheLayer;
use crate::filtering::{record_matches, FilterExpr, FilterOperator};
use crate::types::{ColumnDef, Datasource, Record, RelationshipRow, TableSchema};

use super::{DataAdapter, ReadQuery, RelatedSpec};

/// WordPress rejects per_page above 100.
const WP_MAX_PER_PAGE: i64 = 100;
/// Client-side filtering scans at most this many pages of 100.
const MAX_SCAN_PAGES: i64 = 5;

const CORE_RESOURCES: [&str; 7] = [
    "posts",
    "pages",
    "media",
    "comments",
    "users",
    "categories",
    "tags",
];

/// Query params WordPress understands natively.
const NATIVE_PARAMS: [&str; 5] = ["slug", "author", "categories", "tags", "status"];

pub struct WordPressRestAdapter {
    http: reqwest::Client,
    api_url: String,
    username: Option<String>,
    app_password: Option<String>,
    cache: CacheLayer,
}

impl WordPressRestAdapter {
    pub fn new(datasource: &Datasource, cache: CacheLayer) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_url: datasource
                .api_url
                .clone()
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            username: datasource.username.clone(),
            app_password: datasource.service_key.clone(),
            cache,
        }
    }

    /// Basic auth from an application password. Accepts either a
    /// pre-joined `user:password` credential or separate fields.
    fn auth_header(&self) -> Option<String> {
        let password = self.app_password.clone()?;
        let credential = if password.contains(':') {
            password
        } else {
            format!("{}:{}", self.username.clone()?, password)
        };
        Some(format!("Basic {}", BASE64.encode(credential)))
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, url).header("Accept", "application/json");
        if let Some(auth) = self.auth_header() {
            builder = builder.header("Authorization", auth);
        }
        builder
    }

    /// Resource URL: short names resolve under wp/v2, full paths (e.g.
    /// `wc/v3/products`) are used as-is.
    fn resource_url(&self, table: &str) -> String {
        if table.contains('/') {
            format!("{}/wp-json/{}", self.api_url, table.trim_start_matches('/'))
        } else {
            format!("{}/wp-json/wp/v2/{}", self.api_url, table)
        }
    }

    /// Fetch one collection page; falls back from edit to view context
    /// on 401/403, and treats 400 as "past the last page".
    async fn fetch_page(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<(Vec<Value>, HeaderMap)> {
        let mut response = self
            .request(reqwest::Method::GET, url)
            .query(params)
            .send()
            .await
            .context("wordpress page fetch failed")?;

        let edit_requested = params.iter().any(|(k, v)| k == "context" && v == "edit");
        if edit_requested && matches!(response.status().as_u16(), 401 | 403) {
            debug!("edit context rejected; retrying with view");
            let downgraded: Vec<(String, String)> = params
                .iter()
                .map(|(k, v)| {
                    if k == "context" {
                        (k.clone(), "view".to_string())
                    } else {
                        (k.clone(), v.clone())
                    }
                })
                .collect();
            response = self
                .request(reqwest::Method::GET, url)
                .query(&downgraded)
                .send()
                .await
                .context("wordpress page refetch failed")?;
        }

        if response.status().as_u16() == 400 {
            return Ok((Vec::new(), response.headers().clone()));
        }
        let headers = response.headers().clone();
        let response = response
            .error_for_status()
            .context("wordpress returned an error status")?;
        let data: Value = response.json().await.context("wordpress returned non-JSON")?;
        let records = data.as_array().cloned().unwrap_or_default();
        Ok((records, headers))
    }

    /// Split filters into natively supported query params and the rest,
    /// which must be matched client-side.
    fn split_filters(filters: &[FilterExpr]) -> (Vec<(String, String)>, Vec<FilterExpr>) {
        let mut params = Vec::new();
        let mut client_side = Vec::new();
        for f in filters {
            let Some(value) = &f.value else {
                client_side.push(f.clone());
                continue;
            };
            let raw = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let key = f.field.to_lowercase();
            if key == "id" {
                params.push(("include".to_string(), raw));
            } else if NATIVE_PARAMS.contains(&key.as_str()) && f.operator == FilterOperator::Eq {
                params.push((key, raw));
            } else if key == "search" || f.operator == FilterOperator::Contains {
                params.push(("search".to_string(), raw));
            } else {
                client_side.push(f.clone());
            }
        }
        (params, client_side)
    }

    fn project_columns(records: Vec<Value>, columns: Option<&[String]>) -> Vec<Record> {
        records
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .map(|obj| match columns {
                Some(cols) if !cols.is_empty() => {
                    let mut out = Record::new();
                    for col in cols {
                        if let Some(v) = obj.get(col) {
                            out.insert(col.clone(), v.clone());
                        }
                    }
                    out
                }
                _ => obj,
            })
            .collect()
    }

    async fn fetch_index_resources(&self) -> Vec<String> {
        let url = format!("{}/wp-json/", self.api_url);
        let Ok(response) = self.request(reqwest::Method::GET, &url).send().await else {
            return Vec::new();
        };
        let Ok(body) = response.json::<Value>().await else {
            return Vec::new();
        };
        let namespaces: BTreeSet<String> = body
            .get("namespaces")
            .and_then(Value::as_array)
            .map(|ns| {
                ns.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let mut found = Vec::new();
        if let Some(routes) = body.get("routes").and_then(Value::as_object) {
            for (route, details) in routes {
                let has_get = details
                    .get("endpoints")
                    .and_then(Value::as_array)
                    .map(|eps| {
                        eps.iter().any(|e| {
                            e.get("methods")
                                .and_then(Value::as_array)
                                .map(|m| m.iter().any(|v| v.as_str() == Some("GET")))
                                .unwrap_or(false)
                        })
                    })
                    .unwrap_or(false);
                if !has_get {
                    continue;
                }
                let clean = route.trim_matches('/');
                // Skip the root, bare namespaces, and item routes.
                if clean.is_empty() || namespaces.contains(clean) || route.contains("(?P<") {
                    continue;
                }
                if let Some(short) = clean.strip_prefix("wp/v2/") {
                    if short.contains('/') {
                        found.push(clean.to_string());
                    } else {
                        found.push(short.to_string());
                    }
                } else {
                    found.push(clean.to_string());
                }
            }
        }
        found
    }

    async fn fetch_rest_bases(&self, endpoint: &str) -> Vec<String> {
        let url = format!("{}/wp-json/wp/v2/{endpoint}", self.api_url);
        let Ok(response) = self.request(reqwest::Method::GET, &url).send().await else {
            return Vec::new();
        };
        let Ok(body) = response.json::<Value>().await else {
            return Vec::new();
        };
        body.as_object()
            .map(|map| {
                map.values()
                    .filter_map(|t| t.get("rest_base").and_then(Value::as_str))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn fetch_options_properties(&self, url: &str) -> serde_json::Map<String, Value> {
        let Ok(response) = self
            .request(reqwest::Method::OPTIONS, url)
            .send()
            .await
        else {
            return Default::default();
        };
        let Ok(body) = response.json::<Value>().await else {
            return Default::default();
        };
        body.get("schema")
            .and_then(|s| s.get("properties"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    async fn fetch_sample_record(&self, url: &str) -> serde_json::Map<String, Value> {
        let params = [
            ("per_page".to_string(), "1".to_string()),
            ("context".to_string(), "view".to_string()),
        ];
        match self.fetch_page(url, &params).await {
            Ok((records, _)) => records
                .into_iter()
                .next()
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default(),
            Err(_) => Default::default(),
        }
    }

    fn purge_table_cache(&self, table: &str) -> (String, String) {
        (
            format!("wp:data:{table}:"),
            format!("wp:count:{table}:"),
        )
    }
}

/// Deterministic cache-key token for a filter list, including the
/// operator so differently-shaped filters never collide.
fn filters_cache_token(filters: &[FilterExpr]) -> String {
    let parts: Vec<Value> = filters
        .iter()
        .map(|f| {
            serde_json::json!([
                f.field,
                serde_json::to_value(f.operator).unwrap_or(Value::Null),
                f.value,
            ])
        })
        .collect();
    serde_json::to_string(&parts).unwrap_or_default()
}

/// Add one discovered property to the column list. OPTIONS-declared
/// entries go first, so on a name collision the structured type wins.
fn add_property(
    columns: &mut Vec<ColumnDef>,
    seen: &mut BTreeSet<String>,
    name: &str,
    prop: &Value,
    prefix: &str,
    from_schema: bool,
) {
    let full_name = format!("{prefix}{name}");
    if seen.contains(&full_name) {
        return;
    }

    let data_type = if from_schema {
        let raw = prop.get("type");
        let type_name = match raw {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(options)) => options
                .iter()
                .filter_map(Value::as_str)
                .find(|t| *t != "null")
                .unwrap_or("string")
                .to_string(),
            _ => "string".to_string(),
        };
        if type_name == "object" {
            if let Some(sub) = prop.get("properties").and_then(Value::as_object) {
                seen.insert(full_name.clone());
                for (sub_name, sub_prop) in sub {
                    add_property(
                        columns,
                        seen,
                        sub_name,
                        sub_prop,
                        &format!("{full_name}."),
                        true,
                    );
                }
                return;
            }
        }
        type_name
    } else {
        match prop {
            Value::Null => "string".to_string(),
            Value::Bool(_) => "boolean".to_string(),
            Value::Number(n) if n.is_i64() || n.is_u64() => "integer".to_string(),
            Value::Number(_) => "number".to_string(),
            Value::Array(_) => "array".to_string(),
            Value::Object(map) => {
                // Flatten nested objects into dotted columns.
                seen.insert(full_name.clone());
                for (sub_name, sub_val) in map {
                    add_property(
                        columns,
                        seen,
                        sub_name,
                        sub_val,
                        &format!("{full_name}."),
                        false,
                    );
                }
                return;
            }
            Value::String(_) => "string".to_string(),
        }
    };

    seen.insert(full_name.clone());
    columns.push(ColumnDef {
        primary_key: full_name == "id",
        name: full_name,
        data_type,
        nullable: true,
        default: None,
        is_foreign: false,
        foreign_table: None,
        foreign_column: None,
    });
}

#[async_trait]
impl DataAdapter for WordPressRestAdapter {
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Deep discovery across all REST namespaces, deduplicated, core
    /// resources first.
    #[instrument(skip(self))]
    async fn list_tables(&self) -> Result<Vec<String>> {
        let (types, taxonomies, index) = tokio::join!(
            self.fetch_rest_bases("types"),
            self.fetch_rest_bases("taxonomies"),
            self.fetch_index_resources(),
        );

        let mut all: BTreeSet<String> = BTreeSet::new();
        for resource in types.into_iter().chain(taxonomies).chain(index) {
            if !resource.is_empty() && resource != "types" && resource != "taxonomies" {
                all.insert(resource);
            }
        }

        let mut sorted: Vec<String> = all.into_iter().collect();
        sorted.sort_by_key(|r| {
            (
                !CORE_RESOURCES.contains(&r.as_str()),
                r.contains('/'),
                r.clone(),
            )
        });
        Ok(sorted)
    }

    /// Hybrid schema: OPTIONS properties union one sample record's keys,
    /// types inferred from sample values where the schema is silent.
    #[instrument(skip(self))]
    async fn get_schema(&self, table: &str) -> Result<TableSchema> {
        let url = self.resource_url(table);
        let (options_properties, sample) = tokio::join!(
            self.fetch_options_properties(&url),
            self.fetch_sample_record(&url),
        );

        let mut columns = Vec::new();
        let mut seen = BTreeSet::new();
        for (name, prop) in &options_properties {
            add_property(&mut columns, &mut seen, name, prop, "", true);
        }
        for (name, value) in &sample {
            add_property(&mut columns, &mut seen, name, value, "", false);
        }

        Ok(TableSchema {
            columns,
            foreign_keys: Vec::new(),
        })
    }

    async fn list_all_relationships(&self) -> Result<Vec<RelationshipRow>> {
        // The REST surface exposes no FK metadata.
        Ok(Vec::new())
    }

    #[instrument(skip(self, query))]
    async fn read_records(&self, table: &str, query: &ReadQuery) -> Result<Vec<Record>> {
        let where_json = filters_cache_token(&query.filters);
        let cols_json = serde_json::to_string(&query.columns).unwrap_or_default();
        let order = format!(
            "{}:{}",
            query.order_by.as_deref().unwrap_or(""),
            query.order_direction.as_deref().unwrap_or("asc")
        );
        let cache_key = CacheLayer::read_key(
            "wp:data",
            &self.api_url,
            table,
            query.limit,
            query.offset,
            &where_json,
            &cols_json,
            &order,
        );
        if let Some(cached) = self.cache.get(&cache_key).await {
            if let Ok(records) = serde_json::from_value::<Vec<Record>>(cached) {
                return Ok(records);
            }
        }

        let url = self.resource_url(table);
        let (mut params, client_side) = Self::split_filters(&query.filters);
        params.push((
            "per_page".to_string(),
            query.limit.clamp(1, WP_MAX_PER_PAGE).to_string(),
        ));
        params.push((
            "page".to_string(),
            ((query.offset / WP_MAX_PER_PAGE) + 1).to_string(),
        ));
        params.push(("context".to_string(), "view".to_string()));
        if let Some(search) = &query.search {
            params.push(("search".to_string(), search.clone()));
        }
        if let Some(order_by) = &query.order_by {
            params.push(("orderby".to_string(), order_by.clone()));
            params.push((
                "order".to_string(),
                if query.descending() { "desc" } else { "asc" }.to_string(),
            ));
        }

        let records = if client_side.is_empty() {
            // Fast path: one request, server-side everything.
            let (batch, _) = self.fetch_page(&url, &params).await?;
            let limited: Vec<Value> = batch.into_iter().take(query.limit.max(0) as usize).collect();
            Self::project_columns(limited, query.columns.as_deref())
        } else {
            // Slow path: scan bounded pages, filter client-side.
            let mut matched: Vec<Value> = Vec::new();
            let mut page = 1;
            while (matched.len() as i64) < query.limit && page <= MAX_SCAN_PAGES {
                let mut scan_params: Vec<(String, String)> = params
                    .iter()
                    .filter(|(k, _)| k != "per_page" && k != "page")
                    .cloned()
                    .collect();
                scan_params.push(("per_page".to_string(), WP_MAX_PER_PAGE.to_string()));
                scan_params.push(("page".to_string(), page.to_string()));

                let (batch, _) = self.fetch_page(&url, &scan_params).await?;
                if batch.is_empty() {
                    break;
                }
                for record in batch {
                    if record_matches(&record, &client_side) {
                        matched.push(record);
                        if matched.len() as i64 >= query.limit {
                            break;
                        }
                    }
                }
                page += 1;
            }
            Self::project_columns(matched, query.columns.as_deref())
        };

        self.cache
            .set(
                &cache_key,
                serde_json::to_value(&records).unwrap_or(Value::Null),
                self.cache.ttl_data(),
            )
            .await;
        Ok(records)
    }

    async fn read_records_with_relations(
        &self,
        table: &str,
        _related: &[RelatedSpec],
        query: &ReadQuery,
    ) -> Result<Vec<Record>> {
        // No FK metadata; relation enrichment degrades to a plain read.
        self.read_records(table, query).await
    }

    #[instrument(skip(self, key_value))]
    async fn read_record_by_key(
        &self,
        table: &str,
        key_column: &str,
        key_value: &Value,
    ) -> Result<Option<Record>> {
        if key_column != "id" {
            let mut query = ReadQuery::with_limit(1);
            query.filters = vec![FilterExpr::new(
                key_column,
                FilterOperator::Eq,
                key_value.clone(),
            )];
            let mut records = self.read_records(table, &query).await?;
            return Ok(records.pop());
        }

        let raw = match key_value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let url = format!("{}/{}", self.resource_url(table), raw);
        let response = self
            .request(reqwest::Method::GET, &url)
            .query(&[("context", "edit")])
            .send()
            .await
            .context("wordpress item fetch failed")?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let body: Value = response
            .error_for_status()
            .context("wordpress item fetch returned an error")?
            .json()
            .await
            .context("wordpress item is not JSON")?;
        Ok(body.as_object().cloned())
    }

    /// POST to the item URL when a key is present (update), to the
    /// collection otherwise (create); a 404 update falls back to create.
    #[instrument(skip(self, record))]
    async fn upsert_record(
        &self,
        table: &str,
        record: &Record,
        key_column: &str,
    ) -> Result<Record> {
        let (data_prefix, count_prefix) = self.purge_table_cache(table);
        self.cache.purge_prefix(&data_prefix).await;
        self.cache.purge_prefix(&count_prefix).await;

        let collection_url = self.resource_url(table);
        let key_value = record.get(key_column).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        let mut response = match &key_value {
            Some(key) => {
                let item_url = format!("{collection_url}/{key}");
                self.request(reqwest::Method::POST, &item_url)
                    .json(record)
                    .send()
                    .await
                    .context("wordpress update failed")?
            }
            None => self
                .request(reqwest::Method::POST, &collection_url)
                .json(record)
                .send()
                .await
                .context("wordpress create failed")?,
        };

        if key_value.is_some() && response.status().as_u16() == 404 {
            response = self
                .request(reqwest::Method::POST, &collection_url)
                .json(record)
                .send()
                .await
                .context("wordpress create fallback failed")?;
        }

        let body: Value = response
            .error_for_status()
            .context("wordpress upsert returned an error")?
            .json()
            .await
            .context("wordpress upsert response is not JSON")?;
        body.as_object()
            .cloned()
            .context("wordpress upsert returned a non-object")
    }

    #[instrument(skip(self, key_value))]
    async fn delete_record(
        &self,
        table: &str,
        key_column: &str,
        key_value: &Value,
    ) -> Result<bool> {
        if key_column != "id" {
            // The REST API deletes by id only.
            return Ok(false);
        }
        let (data_prefix, count_prefix) = self.purge_table_cache(table);
        self.cache.purge_prefix(&data_prefix).await;
        self.cache.purge_prefix(&count_prefix).await;

        let raw = match key_value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let url = format!("{}/{}", self.resource_url(table), raw);
        let response = self
            .request(reqwest::Method::DELETE, &url)
            .query(&[("force", "true")])
            .send()
            .await
            .context("wordpress delete failed")?;
        Ok(response.status().is_success())
    }

    /// Without meta filters this is exactly X-WP-Total. With them, the
    /// total is estimated from the first page's match rate, never below
    /// the matches already observed and never above the server total.
    #[instrument(skip(self, filters))]
    async fn count_records(&self, table: &str, filters: &[FilterExpr]) -> Result<i64> {
        let where_json = filters_cache_token(filters);
        let cache_key = CacheLayer::read_key(
            "wp:count",
            &self.api_url,
            table,
            0,
            0,
            &where_json,
            "",
            "",
        );
        if let Some(cached) = self.cache.get(&cache_key).await {
            if let Some(count) = cached.as_i64() {
                return Ok(count);
            }
        }

        let url = self.resource_url(table);
        let (mut params, client_side) = Self::split_filters(filters);
        params.push(("per_page".to_string(), WP_MAX_PER_PAGE.to_string()));
        params.push(("context".to_string(), "view".to_string()));

        let (batch, headers) = self.fetch_page(&url, &params).await?;
        let server_total: i64 = headers
            .get("x-wp-total")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let count = if client_side.is_empty() {
            server_total
        } else if batch.is_empty() {
            0
        } else {
            let matches = batch
                .iter()
                .filter(|r| record_matches(r, &client_side))
                .count() as i64;
            if (batch.len() as i64) < WP_MAX_PER_PAGE || matches == batch.len() as i64 {
                matches
            } else {
                let rate = matches as f64 / batch.len() as f64;
                let estimated = (server_total as f64 * rate) as i64;
                estimated.max(matches).min(server_total)
            }
        };

        self.cache
            .set(&cache_key, Value::from(count), self.cache.ttl_count())
            .await;
        Ok(count)
    }

    async fn search_records(&self, table: &str, query: &str, limit: i64) -> Result<Vec<Record>> {
        let mut read = ReadQuery::with_limit(limit);
        read.search = Some(query.to_string());
        self.read_records(table, &read).await
    }

    async fn count_search_matches(&self, table: &str, query: &str) -> Result<i64> {
        self.count_records(
            table,
            &[FilterExpr::new(
                "search",
                FilterOperator::Contains,
                Value::String(query.to_string()),
            )],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn get_distinct_values(
        &self,
        table: &str,
        column: &str,
        limit: i64,
    ) -> Result<Vec<Value>> {
        let mut read = ReadQuery::with_limit(WP_MAX_PER_PAGE);
        read.columns = Some(vec![column.to_string()]);
        let records = self.read_records(table, &read).await?;
        let mut seen = BTreeSet::new();
        let mut values = Vec::new();
        for record in records {
            if let Some(v) = record.get(column) {
                if v.is_null() {
                    continue;
                }
                let key = v.to_string();
                if seen.insert(key) {
                    values.push(v.clone());
                }
            }
            if values.len() as i64 >= limit {
                break;
            }
        }
        if values.is_empty() {
            warn!("no distinct values found for {table}.{column}");
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn native_filters_become_query_params() {
        let filters = vec![
            FilterExpr::new("slug", FilterOperator::Eq, json!("hello-world")),
            FilterExpr::new("id", FilterOperator::Eq, json!(7)),
            FilterExpr::new("title", FilterOperator::Contains, json!("rust")),
            FilterExpr::new("_meta_field", FilterOperator::Eq, json!("x")),
        ];
        let (params, client_side) = WordPressRestAdapter::split_filters(&filters);
        assert!(params.contains(&("slug".to_string(), "hello-world".to_string())));
        assert!(params.contains(&("include".to_string(), "7".to_string())));
        assert!(params.contains(&("search".to_string(), "rust".to_string())));
        assert_eq!(client_side.len(), 1);
        assert_eq!(client_side[0].field, "_meta_field");
    }

    #[test]
    fn hybrid_schema_prefers_options_types() {
        let mut columns = Vec::new();
        let mut seen = BTreeSet::new();
        // OPTIONS declares `count` as integer ...
        add_property(
            &mut columns,
            &mut seen,
            "count",
            &json!({"type": "integer"}),
            "",
            true,
        );
        // ... the sample sees it as a string; the structured type wins.
        add_property(&mut columns, &mut seen, "count", &json!("12"), "", false);
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].data_type, "integer");
    }

    #[test]
    fn nested_objects_flatten_to_dotted_columns() {
        let mut columns = Vec::new();
        let mut seen = BTreeSet::new();
        add_property(
            &mut columns,
            &mut seen,
            "title",
            &json!({"rendered": "Hello", "raw": "hello"}),
            "",
            false,
        );
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["title.rendered", "title.raw"]);
    }

    #[test]
    fn nullable_union_types_pick_the_non_null_arm() {
        let mut columns = Vec::new();
        let mut seen = BTreeSet::new();
        add_property(
            &mut columns,
            &mut seen,
            "excerpt",
            &json!({"type": ["string", "null"]}),
            "",
            true,
        );
        assert_eq!(columns[0].data_type, "string");
    }

    #[test]
    fn id_column_is_primary_key() {
        let mut columns = Vec::new();
        let mut seen = BTreeSet::new();
        add_property(&mut columns, &mut seen, "id", &json!(12), "", false);
        assert!(columns[0].primary_key);
        assert_eq!(columns[0].data_type, "integer");
    }
}
