// Datasource adapter layer: one capability interface over heterogeneous
// backends, with a factory keyed on the datasource kind.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::cache::CacheLayer;
use crate::errors::FrontbaseError;
use crate::filtering::FilterExpr;
use crate::types::{Datasource, DatasourceKind, Record, RelationshipRow, TableSchema};

pub mod mysql;
pub mod neon;
pub mod postgres;
pub mod supabase;
pub mod wordpress_graphql;
pub mod wordpress_rest;

pub use mysql::MySqlAdapter;
pub use neon::NeonAdapter;
pub use postgres::PostgresAdapter;
pub use supabase::SupabaseAdapter;
pub use wordpress_graphql::WordPressGraphQlAdapter;
pub use wordpress_rest::WordPressRestAdapter;

/// A related table to pull into a flat read:
/// `LEFT JOIN {table} ON base.{fk_col} = {table}.{ref_col}`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedSpec {
    pub table: String,
    pub columns: Vec<String>,
    pub fk_col: String,
    pub ref_col: String,
}

/// Parameters for a filtered, paginated read.
#[derive(Debug, Clone, Default)]
pub struct ReadQuery {
    pub columns: Option<Vec<String>>,
    pub filters: Vec<FilterExpr>,
    pub limit: i64,
    pub offset: i64,
    pub order_by: Option<String>,
    pub order_direction: Option<String>,
    pub search: Option<String>,
    pub search_columns: Option<Vec<String>>,
}

impl ReadQuery {
    pub fn with_limit(limit: i64) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn descending(&self) -> bool {
        self.order_direction
            .as_deref()
            .map(|d| d.eq_ignore_ascii_case("desc"))
            .unwrap_or(false)
    }
}

/// The uniform capability set every backend implements.
///
/// Contract notes:
/// - `read_records_with_relations` returns flat records: related columns
///   keyed `"<table>.<col>"`, base columns unprefixed. Never nested.
/// - Transient I/O is not retried here; retries are the caller's call.
/// - `close` releases pooled connections; adapters are also safe to drop.
#[async_trait]
pub trait DataAdapter: Send + Sync {
    async fn close(&self) -> Result<()>;

    async fn list_tables(&self) -> Result<Vec<String>>;

    async fn get_schema(&self, table: &str) -> Result<TableSchema>;

    async fn list_all_relationships(&self) -> Result<Vec<RelationshipRow>>;

    async fn read_records(&self, table: &str, query: &ReadQuery) -> Result<Vec<Record>>;

    async fn read_records_with_relations(
        &self,
        table: &str,
        related: &[RelatedSpec],
        query: &ReadQuery,
    ) -> Result<Vec<Record>>;

    async fn read_record_by_key(
        &self,
        table: &str,
        key_column: &str,
        key_value: &Value,
    ) -> Result<Option<Record>>;

    async fn upsert_record(&self, table: &str, record: &Record, key_column: &str)
        -> Result<Record>;

    async fn delete_record(&self, table: &str, key_column: &str, key_value: &Value)
        -> Result<bool>;

    async fn count_records(&self, table: &str, filters: &[FilterExpr]) -> Result<i64>;

    async fn search_records(&self, table: &str, query: &str, limit: i64) -> Result<Vec<Record>>;

    async fn count_search_matches(&self, table: &str, query: &str) -> Result<i64>;

    async fn get_distinct_values(
        &self,
        table: &str,
        column: &str,
        limit: i64,
    ) -> Result<Vec<Value>>;
}

/// Build a connected adapter for the datasource. Connection failures
/// come back classified with a diagnostic suggestion.
pub async fn create_adapter(
    datasource: &Datasource,
    cache: &CacheLayer,
) -> Result<Box<dyn DataAdapter>, FrontbaseError> {
    match datasource.kind {
        DatasourceKind::Postgres => Ok(Box::new(PostgresAdapter::connect(datasource).await?)),
        DatasourceKind::Supabase => Ok(Box::new(SupabaseAdapter::connect(datasource).await?)),
        DatasourceKind::Neon => Ok(Box::new(NeonAdapter::connect(datasource).await?)),
        DatasourceKind::Mysql | DatasourceKind::WordpressDb => {
            Ok(Box::new(MySqlAdapter::connect(datasource).await?))
        }
        DatasourceKind::WordpressRest => Ok(Box::new(WordPressRestAdapter::new(
            datasource,
            cache.clone(),
        ))),
        DatasourceKind::WordpressGraphql => {
            Ok(Box::new(WordPressGraphQlAdapter::new(datasource)))
        }
    }
}

/// Strip protocol and path when a URL was pasted into a host field.
pub(crate) fn sanitize_host(host: &str) -> &str {
    let host = host.split("://").last().unwrap_or(host);
    host.split('/').next().unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_host_strips_protocol_and_path() {
        assert_eq!(sanitize_host("db.example.com"), "db.example.com");
        assert_eq!(sanitize_host("https://db.example.com/db"), "db.example.com");
        assert_eq!(sanitize_host("postgres://h:5432/x"), "h:5432");
    }

    #[test]
    fn read_query_direction_defaults_ascending() {
        let mut q = ReadQuery::with_limit(10);
        assert!(!q.descending());
        q.order_direction = Some("DESC".into());
        assert!(q.descending());
    }
}
