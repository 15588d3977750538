// Neon serverless Postgres: smaller pool, shorter statement timeout,
// TLS required, and Neon system tables hidden from listings.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::errors::FrontbaseError;
use crate::filtering::FilterExpr;
use crate::types::{Datasource, Record, RelationshipRow, TableSchema};

use super::postgres::{PoolProfile, PostgresAdapter};
use super::{DataAdapter, ReadQuery, RelatedSpec};

const HIDDEN_PREFIXES: [&str; 3] = ["_neon", "pg_", "information_schema"];

pub struct NeonAdapter {
    inner: PostgresAdapter,
}

impl NeonAdapter {
    pub async fn connect(datasource: &Datasource) -> Result<Self, FrontbaseError> {
        let profile = PoolProfile {
            max_connections: 5,
            statement_timeout: Duration::from_secs(30),
            require_ssl: true,
        };
        let inner = PostgresAdapter::connect_with(datasource, profile).await?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl DataAdapter for NeonAdapter {
    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = self.inner.list_tables().await?;
        Ok(tables
            .into_iter()
            .filter(|t| !HIDDEN_PREFIXES.iter().any(|p| t.starts_with(p)))
            .collect())
    }

    async fn get_schema(&self, table: &str) -> Result<TableSchema> {
        self.inner.get_schema(table).await
    }

    async fn list_all_relationships(&self) -> Result<Vec<RelationshipRow>> {
        self.inner.list_all_relationships().await
    }

    async fn read_records(&self, table: &str, query: &ReadQuery) -> Result<Vec<Record>> {
        self.inner.read_records(table, query).await
    }

    async fn read_records_with_relations(
        &self,
        table: &str,
        related: &[RelatedSpec],
        query: &ReadQuery,
    ) -> Result<Vec<Record>> {
        self.inner
            .read_records_with_relations(table, related, query)
            .await
    }

    async fn read_record_by_key(
        &self,
        table: &str,
        key_column: &str,
        key_value: &Value,
    ) -> Result<Option<Record>> {
        self.inner.read_record_by_key(table, key_column, key_value).await
    }

    async fn upsert_record(
        &self,
        table: &str,
        record: &Record,
        key_column: &str,
    ) -> Result<Record> {
        self.inner.upsert_record(table, record, key_column).await
    }

    async fn delete_record(
        &self,
        table: &str,
        key_column: &str,
        key_value: &Value,
    ) -> Result<bool> {
        self.inner.delete_record(table, key_column, key_value).await
    }

    async fn count_records(&self, table: &str, filters: &[FilterExpr]) -> Result<i64> {
        self.inner.count_records(table, filters).await
    }

    async fn search_records(&self, table: &str, query: &str, limit: i64) -> Result<Vec<Record>> {
        self.inner.search_records(table, query, limit).await
    }

    async fn count_search_matches(&self, table: &str, query: &str) -> Result<i64> {
        self.inner.count_search_matches(table, query).await
    }

    async fn get_distinct_values(
        &self,
        table: &str,
        column: &str,
        limit: i64,
    ) -> Result<Vec<Value>> {
        self.inner.get_distinct_values(table, column, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_prefix_filter_matches_spec() {
        let tables = vec![
            "_neon_migration".to_string(),
            "pg_stat_statements".to_string(),
            "information_schema_junk".to_string(),
            "institutions".to_string(),
        ];
        let visible: Vec<_> = tables
            .into_iter()
            .filter(|t| !HIDDEN_PREFIXES.iter().any(|p| t.starts_with(p)))
            .collect();
        assert_eq!(visible, vec!["institutions".to_string()]);
    }
}
