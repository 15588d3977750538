// WPGraphQL adapter. Discovery and bounded reads work; mutations and
// counts need plugins the API does not guarantee. Upserts are rejected
// with an explicit error; deletes, counts, and searches return their
// empty shapes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::instrument;

use crate::errors::FrontbaseError;
use crate::filtering::FilterExpr;
use crate::types::{ColumnDef, Datasource, Record, RelationshipRow, TableSchema};

use super::{DataAdapter, ReadQuery, RelatedSpec};

pub struct WordPressGraphQlAdapter {
    http: reqwest::Client,
    api_url: String,
}

impl WordPressGraphQlAdapter {
    pub fn new(datasource: &Datasource) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
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
        }
    }

    async fn execute(&self, query: String) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}/graphql", self.api_url))
            .json(&json!({ "query": query }))
            .send()
            .await
            .context("graphql request failed")?;
        response
            .error_for_status()
            .context("graphql returned an error status")?
            .json()
            .await
            .context("graphql returned non-JSON")
    }
}

#[async_trait]
impl DataAdapter for WordPressGraphQlAdapter {
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_tables(&self) -> Result<Vec<String>> {
        let body = self
            .execute(
                "query GetContentTypes { contentTypes { nodes { graphqlPluralName } } }"
                    .to_string(),
            )
            .await?;
        let nodes = body
            .pointer("/data/contentTypes/nodes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(nodes
            .iter()
            .filter_map(|n| n.get("graphqlPluralName").and_then(Value::as_str))
            .map(String::from)
            .collect())
    }

    async fn get_schema(&self, _table: &str) -> Result<TableSchema> {
        // Minimal fixed shape; full introspection needs the schema
        // plugin and is out of contract.
        let columns = [("id", false), ("title", true), ("content", true), ("date", true)]
            .into_iter()
            .map(|(name, nullable)| ColumnDef {
                name: name.to_string(),
                data_type: "string".to_string(),
                nullable,
                primary_key: name == "id",
                default: None,
                is_foreign: false,
                foreign_table: None,
                foreign_column: None,
            })
            .collect();
        Ok(TableSchema {
            columns,
            foreign_keys: Vec::new(),
        })
    }

    async fn list_all_relationships(&self) -> Result<Vec<RelationshipRow>> {
        Ok(Vec::new())
    }

    #[instrument(skip(self, query))]
    async fn read_records(&self, table: &str, query: &ReadQuery) -> Result<Vec<Record>> {
        let cols = match &query.columns {
            Some(cols) if !cols.is_empty() => cols.join(" "),
            _ => "id title content date".to_string(),
        };
        let order_clause = match &query.order_by {
            Some(order_by) => {
                let direction = if query.descending() { "DESC" } else { "ASC" };
                format!(
                    ", where: {{orderby: {{field: \"{}\", order: {direction}}}}}",
                    order_by.to_uppercase()
                )
            }
            None => String::new(),
        };
        let gql = format!(
            "query GetRecords {{ {table}(first: {}{order_clause}) {{ nodes {{ {cols} }} }} }}",
            query.limit.max(0),
        );
        let body = self.execute(gql).await?;
        let nodes = body
            .pointer(&format!("/data/{table}/nodes"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(nodes
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect())
    }

    async fn read_records_with_relations(
        &self,
        table: &str,
        _related: &[RelatedSpec],
        query: &ReadQuery,
    ) -> Result<Vec<Record>> {
        self.read_records(table, query).await
    }

    async fn read_record_by_key(
        &self,
        _table: &str,
        _key_column: &str,
        _key_value: &Value,
    ) -> Result<Option<Record>> {
        Ok(None)
    }

    async fn upsert_record(
        &self,
        table: &str,
        _record: &Record,
        _key_column: &str,
    ) -> Result<Record> {
        // GraphQL mutations are type-specific and need plugins this
        // adapter cannot assume. Echoing the input back would read as a
        // successful write to any generic caller, so refuse instead.
        Err(FrontbaseError::Validation(format!(
            "the WPGraphQL adapter does not support record mutations (upsert into {table})"
        ))
        .into())
    }

    async fn delete_record(
        &self,
        _table: &str,
        _key_column: &str,
        _key_value: &Value,
    ) -> Result<bool> {
        Ok(false)
    }

    async fn count_records(&self, _table: &str, _filters: &[FilterExpr]) -> Result<i64> {
        // Total counts need a pagination plugin.
        Ok(0)
    }

    async fn search_records(&self, _table: &str, _query: &str, _limit: i64) -> Result<Vec<Record>> {
        Ok(Vec::new())
    }

    async fn count_search_matches(&self, _table: &str, _query: &str) -> Result<i64> {
        Ok(0)
    }

    async fn get_distinct_values(
        &self,
        table: &str,
        column: &str,
        limit: i64,
    ) -> Result<Vec<Value>> {
        let mut read = ReadQuery::with_limit(limit);
        read.columns = Some(vec![column.to_string()]);
        let records = self.read_records(table, &read).await?;
        let mut values: Vec<Value> = records
            .into_iter()
            .filter_map(|r| r.get(column).cloned())
            .filter(|v| !v.is_null())
            .collect();
        values.dedup_by_key(|v| v.to_string());
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DatasourceKind;
    use chrono::Utc;

    fn adapter() -> WordPressGraphQlAdapter {
        WordPressGraphQlAdapter::new(&crate::types::Datasource {
            id: "ds1".into(),
            name: "wp".into(),
            kind: DatasourceKind::WordpressGraphql,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            api_url: Some("https://example.com".into()),
            service_key: None,
            anon_key: None,
            table_prefix: "wp_".into(),
            active: true,
            last_tested_at: None,
            last_test_success: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn upsert_is_rejected_not_echoed() {
        let record: Record = serde_json::json!({"id": 1, "title": "x"})
            .as_object()
            .unwrap()
            .clone();
        let err = adapter()
            .upsert_record("posts", &record, "id")
            .await
            .unwrap_err();
        let classified = err.downcast::<FrontbaseError>().unwrap();
        assert!(matches!(classified, FrontbaseError::Validation(_)));
    }

    #[tokio::test]
    async fn unsupported_operations_return_empty_shapes() {
        let a = adapter();
        assert!(!a
            .delete_record("posts", "id", &Value::from(1))
            .await
            .unwrap());
        assert_eq!(a.count_records("posts", &[]).await.unwrap(), 0);
        assert!(a.search_records("posts", "x", 10).await.unwrap().is_empty());
        assert_eq!(a.count_search_matches("posts", "x").await.unwrap(), 0);
    }
}
