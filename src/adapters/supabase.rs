// Supabase adapter: direct Postgres for bulk work, PostgREST for
// URL-only registrations where no direct host is configured.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::errors::FrontbaseError;
use crate::filtering::{FilterExpr, FilterOperator};
use crate::types::{Datasource, Record, RelationshipRow, TableSchema};

use super::postgres::PostgresAdapter;
use super::{DataAdapter, ReadQuery, RelatedSpec};

pub struct SupabaseAdapter {
    inner: Option<PostgresAdapter>,
    rest: Option<RestClient>,
    name: String,
}

struct RestClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SupabaseAdapter {
    pub async fn connect(datasource: &Datasource) -> Result<Self, FrontbaseError> {
        let rest = Self::build_rest_client(datasource);

        let inner = if datasource.host.as_deref().unwrap_or("").is_empty() {
            if rest.is_none() {
                return Err(FrontbaseError::Validation(
                    "Supabase datasource needs either a direct host or an API URL with a key"
                        .to_string(),
                ));
            }
            info!(
                "Supabase datasource '{}' has no direct host; using PostgREST only",
                datasource.name
            );
            None
        } else {
            Some(PostgresAdapter::connect(datasource).await?)
        };

        Ok(Self {
            inner,
            rest,
            name: datasource.name.clone(),
        })
    }

    fn build_rest_client(datasource: &Datasource) -> Option<RestClient> {
        let base_url = datasource.api_url.clone()?;
        let api_key = datasource
            .service_key
            .clone()
            .or_else(|| datasource.anon_key.clone())?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .ok()?;
        Some(RestClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn sql(&self) -> Result<&PostgresAdapter> {
        self.inner.as_ref().with_context(|| {
            format!(
                "Supabase datasource '{}' has no direct connection; this operation needs one",
                self.name
            )
        })
    }

    fn rest(&self) -> Result<&RestClient> {
        self.rest.as_ref().with_context(|| {
            format!("Supabase datasource '{}' has no REST credentials", self.name)
        })
    }

    /// Map a filter into PostgREST query-string form.
    fn rest_filter_param(filter: &FilterExpr) -> Option<(String, String)> {
        let value = filter.value.as_ref()?;
        let raw = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let rhs = match filter.operator {
            FilterOperator::Eq => format!("eq.{raw}"),
            FilterOperator::Ne => format!("neq.{raw}"),
            FilterOperator::Gt => format!("gt.{raw}"),
            FilterOperator::Lt => format!("lt.{raw}"),
            FilterOperator::Contains => format!("ilike.*{raw}*"),
            _ => return None,
        };
        Some((filter.field.clone(), rhs))
    }

    /// Read through PostgREST. Used when the datasource is URL-only.
    #[instrument(skip(self, query))]
    pub async fn read_records_via_api(
        &self,
        table: &str,
        query: &ReadQuery,
    ) -> Result<Vec<Record>> {
        let rest = self.rest()?;
        let mut params: Vec<(String, String)> = Vec::new();
        if let Some(cols) = &query.columns {
            if !cols.is_empty() {
                params.push(("select".to_string(), cols.join(",")));
            }
        }
        for filter in &query.filters {
            if let Some(param) = Self::rest_filter_param(filter) {
                params.push(param);
            }
        }
        if let Some(order_by) = &query.order_by {
            let dir = if query.descending() { "desc" } else { "asc" };
            params.push(("order".to_string(), format!("{order_by}.{dir}")));
        }
        params.push(("limit".to_string(), query.limit.to_string()));
        params.push(("offset".to_string(), query.offset.to_string()));

        let url = format!("{}/rest/v1/{}", rest.base_url, table);
        debug!(url = %url, "supabase REST read");
        let response = rest
            .http
            .get(&url)
            .header("apikey", &rest.api_key)
            .bearer_auth(&rest.api_key)
            .query(&params)
            .send()
            .await
            .context("PostgREST read failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FrontbaseError::UpstreamHttp {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            }
            .into());
        }
        let rows: Vec<Record> = response.json().await.context("PostgREST returned non-JSON")?;
        Ok(rows)
    }

    /// Exact row count through PostgREST's content-range header.
    #[instrument(skip(self, filters))]
    pub async fn count_records_via_api(
        &self,
        table: &str,
        filters: &[FilterExpr],
    ) -> Result<i64> {
        let rest = self.rest()?;
        let mut params: Vec<(String, String)> = vec![("select".to_string(), "*".to_string())];
        for filter in filters {
            if let Some(param) = Self::rest_filter_param(filter) {
                params.push(param);
            }
        }
        let url = format!("{}/rest/v1/{}", rest.base_url, table);
        let response = rest
            .http
            .head(&url)
            .header("apikey", &rest.api_key)
            .bearer_auth(&rest.api_key)
            .header("Prefer", "count=exact")
            .query(&params)
            .send()
            .await
            .context("PostgREST count failed")?;
        let range = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        Ok(parse_content_range_total(range).unwrap_or(0))
    }

    /// Upsert through PostgREST with merge-duplicates resolution.
    #[instrument(skip(self, record))]
    pub async fn upsert_record_via_api(&self, table: &str, record: &Record) -> Result<Record> {
        let rest = self.rest()?;
        let url = format!("{}/rest/v1/{}", rest.base_url, table);
        let response = rest
            .http
            .post(&url)
            .header("apikey", &rest.api_key)
            .bearer_auth(&rest.api_key)
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(record)
            .send()
            .await
            .context("PostgREST upsert failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FrontbaseError::UpstreamHttp {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            }
            .into());
        }
        let rows: Vec<Record> = response.json().await.unwrap_or_default();
        Ok(rows.into_iter().next().unwrap_or_else(|| record.clone()))
    }
}

#[async_trait]
impl DataAdapter for SupabaseAdapter {
    async fn close(&self) -> Result<()> {
        if let Some(inner) = &self.inner {
            inner.close().await?;
        }
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.sql()?.list_tables().await
    }

    async fn get_schema(&self, table: &str) -> Result<TableSchema> {
        self.sql()?.get_schema(table).await
    }

    async fn list_all_relationships(&self) -> Result<Vec<RelationshipRow>> {
        self.sql()?.list_all_relationships().await
    }

    async fn read_records(&self, table: &str, query: &ReadQuery) -> Result<Vec<Record>> {
        match &self.inner {
            Some(inner) => inner.read_records(table, query).await,
            None => self.read_records_via_api(table, query).await,
        }
    }

    async fn read_records_with_relations(
        &self,
        table: &str,
        related: &[RelatedSpec],
        query: &ReadQuery,
    ) -> Result<Vec<Record>> {
        self.sql()?
            .read_records_with_relations(table, related, query)
            .await
    }

    async fn read_record_by_key(
        &self,
        table: &str,
        key_column: &str,
        key_value: &Value,
    ) -> Result<Option<Record>> {
        match &self.inner {
            Some(inner) => inner.read_record_by_key(table, key_column, key_value).await,
            None => {
                let mut query = ReadQuery::with_limit(1);
                query.filters = vec![FilterExpr::new(
                    key_column,
                    FilterOperator::Eq,
                    key_value.clone(),
                )];
                let mut rows = self.read_records_via_api(table, &query).await?;
                Ok(rows.pop())
            }
        }
    }

    async fn upsert_record(
        &self,
        table: &str,
        record: &Record,
        key_column: &str,
    ) -> Result<Record> {
        match &self.inner {
            Some(inner) => inner.upsert_record(table, record, key_column).await,
            None => self.upsert_record_via_api(table, record).await,
        }
    }

    async fn delete_record(
        &self,
        table: &str,
        key_column: &str,
        key_value: &Value,
    ) -> Result<bool> {
        self.sql()?.delete_record(table, key_column, key_value).await
    }

    async fn count_records(&self, table: &str, filters: &[FilterExpr]) -> Result<i64> {
        match &self.inner {
            Some(inner) => inner.count_records(table, filters).await,
            None => self.count_records_via_api(table, filters).await,
        }
    }

    async fn search_records(&self, table: &str, query: &str, limit: i64) -> Result<Vec<Record>> {
        self.sql()?.search_records(table, query, limit).await
    }

    async fn count_search_matches(&self, table: &str, query: &str) -> Result<i64> {
        self.sql()?.count_search_matches(table, query).await
    }

    async fn get_distinct_values(
        &self,
        table: &str,
        column: &str,
        limit: i64,
    ) -> Result<Vec<Value>> {
        self.sql()?.get_distinct_values(table, column, limit).await
    }
}

/// `content-range: 0-24/3573` → 3573
fn parse_content_range_total(range: &str) -> Option<i64> {
    range.rsplit('/').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_map_to_postgrest_operators() {
        let cases = [
            (FilterOperator::Eq, "eq.live"),
            (FilterOperator::Ne, "neq.live"),
            (FilterOperator::Gt, "gt.live"),
            (FilterOperator::Lt, "lt.live"),
            (FilterOperator::Contains, "ilike.*live*"),
        ];
        for (op, expected) in cases {
            let f = FilterExpr::new("status", op, json!("live"));
            let (field, rhs) = SupabaseAdapter::rest_filter_param(&f).unwrap();
            assert_eq!(field, "status");
            assert_eq!(rhs, expected);
        }
    }

    #[test]
    fn unsupported_rest_operators_are_skipped() {
        let f = FilterExpr::new("status", FilterOperator::In, json!("a,b"));
        assert!(SupabaseAdapter::rest_filter_param(&f).is_none());
    }

    #[test]
    fn content_range_parsing() {
        assert_eq!(parse_content_range_total("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total(""), None);
    }
}
