// PostgreSQL adapter over a per-datasource sqlx pool.
//
// Reads come back as JSON via row_to_json/json_agg so arbitrary column
// types decode uniformly. Identifiers are always quoted; values are
// always bound.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::errors::FrontbaseError;
use crate::filtering::{build_where_clause, FilterExpr, SqlDialect, WhereClause};
use crate::types::{ColumnDef, Datasource, FkDef, Record, RelationshipRow, TableSchema};

use super::{sanitize_host, DataAdapter, ReadQuery, RelatedSpec};

/// Pool sizing knobs; the Neon variant narrows these.
#[derive(Debug, Clone)]
pub struct PoolProfile {
    pub max_connections: u32,
    pub statement_timeout: Duration,
    pub require_ssl: bool,
}

impl Default for PoolProfile {
    fn default() -> Self {
        Self {
            max_connections: 10,
            statement_timeout: Duration::from_secs(60),
            require_ssl: false,
        }
    }
}

/// Bind a slice of JSON values onto any sqlx query builder.
macro_rules! bind_values {
    ($query:expr, $params:expr) => {{
        let mut q = $query;
        for p in $params {
            q = match p {
                Value::Null => q.bind(Option::<String>::None),
                Value::Bool(b) => q.bind(*b),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        q.bind(i)
                    } else {
                        q.bind(n.as_f64().unwrap_or(0.0))
                    }
                }
                Value::String(s) => q.bind(s.clone()),
                other => q.bind(other.to_string()),
            };
        }
        q
    }};
}

pub(crate) use bind_values;

pub struct PostgresAdapter {
    pool: PgPool,
    label: String,
}

#[derive(Debug, sqlx::FromRow)]
struct ColumnRow {
    column_name: String,
    data_type: String,
    is_nullable: String,
    column_default: Option<String>,
    is_primary_key: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct FkRow {
    column_name: String,
    foreign_table: String,
    foreign_column: String,
}

#[derive(Debug, sqlx::FromRow)]
struct RelationshipDbRow {
    source_table: String,
    source_column: String,
    target_table: String,
    target_column: String,
}

impl PostgresAdapter {
    pub async fn connect(datasource: &Datasource) -> Result<Self, FrontbaseError> {
        Self::connect_with(datasource, PoolProfile::default()).await
    }

    /// Establish the pool. The first attempt verifies TLS certificates;
    /// on a verification failure it retries once with verification
    /// disabled, which Supabase/Neon poolers with self-signed chains
    /// need.
    pub async fn connect_with(
        datasource: &Datasource,
        profile: PoolProfile,
    ) -> Result<Self, FrontbaseError> {
        let host_raw = datasource.host.clone().unwrap_or_default();
        let host = sanitize_host(&host_raw).to_string();
        if host.is_empty() {
            return Err(FrontbaseError::Validation(
                "database host is required".to_string(),
            ));
        }

        let label = datasource.name.clone();
        info!(
            "Connecting to Postgres: host='{}', port={:?}, database={:?}, user={:?}",
            host, datasource.port, datasource.database, datasource.username
        );

        let first_mode = if profile.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::VerifyFull
        };

        match Self::try_pool(datasource, &host, &profile, first_mode).await {
            Ok(pool) => Ok(Self { pool, label }),
            Err(e) => {
                let message = e.to_string();
                let lowered = message.to_lowercase();
                let tls_failure = lowered.contains("certificate")
                    || lowered.contains("self signed")
                    || lowered.contains("ssl")
                    || lowered.contains("tls");
                if tls_failure {
                    // Pooler endpoints with self-signed chains and plain
                    // local servers both land here; retry once without
                    // verification (plaintext allowed unless SSL is
                    // mandatory for this profile).
                    let fallback = if profile.require_ssl {
                        PgSslMode::Require
                    } else {
                        PgSslMode::Prefer
                    };
                    warn!(
                        "TLS negotiation failed for {host}; retrying with verification disabled"
                    );
                    match Self::try_pool(datasource, &host, &profile, fallback).await {
                        Ok(pool) => {
                            info!("Established Postgres pool to {host} (TLS unverified)");
                            Ok(Self { pool, label })
                        }
                        Err(retry) => Err(FrontbaseError::connection(retry.to_string())),
                    }
                } else {
                    Err(FrontbaseError::connection(message))
                }
            }
        }
    }

    async fn try_pool(
        datasource: &Datasource,
        host: &str,
        profile: &PoolProfile,
        ssl_mode: PgSslMode,
    ) -> Result<PgPool, sqlx::Error> {
        let timeout_ms = profile.statement_timeout.as_millis().to_string();
        let mut options = PgConnectOptions::new()
            .host(host)
            .port(datasource.port.unwrap_or(5432) as u16)
            .ssl_mode(ssl_mode)
            // Pooler mode (pgbouncer) breaks prepared-statement caching.
            .statement_cache_capacity(0)
            .options([("statement_timeout", timeout_ms.as_str())]);
        if let Some(database) = &datasource.database {
            options = options.database(database);
        }
        if let Some(username) = &datasource.username {
            options = options.username(username);
        }
        if let Some(password) = &datasource.password {
            options = options.password(password);
        }

        PgPoolOptions::new()
            .min_connections(1)
            .max_connections(profile.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .test_before_acquire(true)
            .connect_with(options)
            .await
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn quote(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', ""))
    }

    fn select_list(table: &str, columns: Option<&[String]>) -> String {
        match columns {
            Some(cols) if !cols.is_empty() => cols
                .iter()
                .map(|c| format!("{}.{}", Self::quote(table), Self::quote(c)))
                .collect::<Vec<_>>()
                .join(", "),
            _ => format!("{}.*", Self::quote(table)),
        }
    }

    fn order_clause(query: &ReadQuery) -> String {
        match &query.order_by {
            Some(col) if is_safe_ident(col) => {
                let dir = if query.descending() { "DESC" } else { "ASC" };
                format!(" ORDER BY {} {dir}", SqlDialect::Postgres.quote_ident(col))
            }
            _ => String::new(),
        }
    }

    /// Append an OR-of-LIKEs search block to an existing clause.
    fn append_search(clause: &mut WhereClause, search: &str, columns: &[String]) {
        if search.is_empty() || columns.is_empty() {
            return;
        }
        let mut conditions = Vec::with_capacity(columns.len());
        for col in columns {
            clause
                .params
                .push(Value::String(format!("%{search}%")));
            conditions.push(format!(
                "CAST({} AS TEXT) LIKE ${}",
                SqlDialect::Postgres.quote_ident(col),
                clause.params.len()
            ));
        }
        let block = format!("({})", conditions.join(" OR "));
        if clause.sql.is_empty() {
            clause.sql = format!(" WHERE {block}");
        } else {
            clause.sql.push_str(&format!(" AND {block}"));
        }
    }

    async fn fetch_json_rows(&self, inner_sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        let sql = format!(
            "SELECT COALESCE(json_agg(row_to_json(q)), '[]'::json) FROM ({inner_sql}) q"
        );
        debug!(adapter = %self.label, sql = %inner_sql, "postgres read");
        let query = sqlx::query_scalar::<_, Value>(&sql);
        let value: Value = bind_values!(query, params)
            .fetch_one(&self.pool)
            .await
            .context("postgres read failed")?;
        Ok(json_array_to_records(value))
    }

    async fn search_columns_for(&self, table: &str) -> Result<Vec<String>> {
        let schema = self.get_schema(table).await?;
        Ok(schema.columns.into_iter().map(|c| c.name).collect())
    }
}

#[async_trait]
impl DataAdapter for PostgresAdapter {
    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = sqlx::query_scalar::<_, String>(
            r#"
            SELECT table_name
            FROM information_schema.tables
            WHERE table_schema = 'public'
              AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list tables")?;
        Ok(tables)
    }

    #[instrument(skip(self))]
    async fn get_schema(&self, table: &str) -> Result<TableSchema> {
        let columns = sqlx::query_as::<_, ColumnRow>(
            r#"
            SELECT
                c.column_name,
                c.data_type,
                c.is_nullable,
                c.column_default,
                CASE WHEN pk.column_name IS NOT NULL THEN TRUE ELSE FALSE END AS is_primary_key
            FROM information_schema.columns c
            LEFT JOIN (
                SELECT ku.column_name
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage ku
                    ON tc.constraint_name = ku.constraint_name
                WHERE tc.constraint_type = 'PRIMARY KEY'
                  AND tc.table_name = $1
            ) pk ON c.column_name = pk.column_name
            WHERE c.table_name = $1 AND c.table_schema = 'public'
            ORDER BY c.ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .context("failed to read column metadata")?;

        let fk_rows = sqlx::query_as::<_, FkRow>(
            r#"
            SELECT kcu.column_name,
                   ccu.table_name AS foreign_table,
                   ccu.column_name AS foreign_column
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
            JOIN information_schema.constraint_column_usage ccu
                ON ccu.constraint_name = tc.constraint_name
            WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_name = $1
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .context("failed to read foreign keys")?;

        debug!("FK discovery for '{table}': found {} foreign keys", fk_rows.len());

        let columns = columns
            .into_iter()
            .map(|row| {
                let fk = fk_rows.iter().find(|f| f.column_name == row.column_name);
                ColumnDef {
                    name: row.column_name,
                    data_type: row.data_type,
                    nullable: row.is_nullable == "YES",
                    primary_key: row.is_primary_key,
                    default: row.column_default.map(Value::String),
                    is_foreign: fk.is_some(),
                    foreign_table: fk.map(|f| f.foreign_table.clone()),
                    foreign_column: fk.map(|f| f.foreign_column.clone()),
                }
            })
            .collect();

        let foreign_keys = fk_rows
            .into_iter()
            .map(|f| FkDef {
                constrained_columns: vec![f.column_name],
                referred_table: f.foreign_table,
                referred_columns: vec![f.foreign_column],
            })
            .collect();

        Ok(TableSchema {
            columns,
            foreign_keys,
        })
    }

    #[instrument(skip(self))]
    async fn list_all_relationships(&self) -> Result<Vec<RelationshipRow>> {
        let rows = sqlx::query_as::<_, RelationshipDbRow>(
            r#"
            SELECT
                tc.table_name AS source_table,
                kcu.column_name AS source_column,
                ccu.table_name AS target_table,
                ccu.column_name AS target_column
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
            JOIN information_schema.constraint_column_usage ccu
                ON ccu.constraint_name = tc.constraint_name
            WHERE tc.constraint_type = 'FOREIGN KEY'
            ORDER BY tc.table_name, kcu.column_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list relationships")?;

        info!("Found {} total FK relationships", rows.len());
        Ok(rows
            .into_iter()
            .map(|r| RelationshipRow {
                source_table: r.source_table,
                source_column: r.source_column,
                target_table: r.target_table,
                target_column: r.target_column,
            })
            .collect())
    }

    #[instrument(skip(self, query))]
    async fn read_records(&self, table: &str, query: &ReadQuery) -> Result<Vec<Record>> {
        let mut clause = build_where_clause(&query.filters, SqlDialect::Postgres);
        if let Some(search) = &query.search {
            let columns = match &query.search_columns {
                Some(cols) if !cols.is_empty() => cols.clone(),
                _ => self.search_columns_for(table).await?,
            };
            Self::append_search(&mut clause, search, &columns);
        }

        let inner = format!(
            "SELECT {} FROM {}{}{} LIMIT {} OFFSET {}",
            Self::select_list(table, query.columns.as_deref()),
            Self::quote(table),
            clause.sql,
            Self::order_clause(query),
            query.limit.max(0),
            query.offset.max(0),
        );
        self.fetch_json_rows(&inner, &clause.params).await
    }

    #[instrument(skip(self, related, query))]
    async fn read_records_with_relations(
        &self,
        table: &str,
        related: &[RelatedSpec],
        query: &ReadQuery,
    ) -> Result<Vec<Record>> {
        let mut select_parts = vec![Self::select_list(table, query.columns.as_deref())];
        let mut joins = String::new();
        for spec in related {
            for col in &spec.columns {
                select_parts.push(format!(
                    "{}.{} AS \"{}.{}\"",
                    Self::quote(&spec.table),
                    Self::quote(col),
                    spec.table.replace('"', ""),
                    col.replace('"', ""),
                ));
            }
            joins.push_str(&format!(
                " LEFT JOIN {} ON {}.{} = {}.{}",
                Self::quote(&spec.table),
                Self::quote(table),
                Self::quote(&spec.fk_col),
                Self::quote(&spec.table),
                Self::quote(&spec.ref_col),
            ));
        }

        let mut clause = build_where_clause(&query.filters, SqlDialect::Postgres);
        if let Some(search) = &query.search {
            let columns = match &query.search_columns {
                Some(cols) if !cols.is_empty() => cols.clone(),
                _ => self.search_columns_for(table).await?,
            };
            Self::append_search(&mut clause, search, &columns);
        }

        let inner = format!(
            "SELECT {} FROM {}{}{}{} LIMIT {} OFFSET {}",
            select_parts.join(", "),
            Self::quote(table),
            joins,
            clause.sql,
            Self::order_clause(query),
            query.limit.max(0),
            query.offset.max(0),
        );
        self.fetch_json_rows(&inner, &clause.params).await
    }

    #[instrument(skip(self, key_value))]
    async fn read_record_by_key(
        &self,
        table: &str,
        key_column: &str,
        key_value: &Value,
    ) -> Result<Option<Record>> {
        let inner = format!(
            "SELECT * FROM {} WHERE CAST({} AS TEXT) = $1 LIMIT 1",
            Self::quote(table),
            Self::quote(key_column),
        );
        let params = [Value::String(value_as_key(key_value))];
        let mut rows = self.fetch_json_rows(&inner, &params).await?;
        Ok(rows.pop())
    }

    #[instrument(skip(self, record))]
    async fn upsert_record(
        &self,
        table: &str,
        record: &Record,
        key_column: &str,
    ) -> Result<Record> {
        let columns: Vec<&String> = record.keys().collect();
        if columns.is_empty() {
            anyhow::bail!("cannot upsert an empty record");
        }
        let col_list = columns
            .iter()
            .map(|c| Self::quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let update_cols: Vec<String> = columns
            .iter()
            .filter(|c| c.as_str() != key_column)
            .map(|c| format!("{} = EXCLUDED.{}", Self::quote(c), Self::quote(c)))
            .collect();

        let conflict_action = if update_cols.is_empty() {
            format!(
                "DO UPDATE SET {} = EXCLUDED.{}",
                Self::quote(key_column),
                Self::quote(key_column)
            )
        } else {
            format!("DO UPDATE SET {}", update_cols.join(", "))
        };

        let sql = format!(
            "WITH up AS (INSERT INTO {} ({col_list}) VALUES ({placeholders}) \
             ON CONFLICT ({}) {conflict_action} RETURNING *) \
             SELECT row_to_json(up) FROM up",
            Self::quote(table),
            Self::quote(key_column),
        );

        let params: Vec<Value> = record.values().cloned().collect();
        let query = sqlx::query_scalar::<_, Value>(&sql);
        let value: Value = bind_values!(query, &params)
            .fetch_one(&self.pool)
            .await
            .context("postgres upsert failed")?;
        value
            .as_object()
            .cloned()
            .context("upsert returned a non-object row")
    }

    #[instrument(skip(self, key_value))]
    async fn delete_record(
        &self,
        table: &str,
        key_column: &str,
        key_value: &Value,
    ) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE CAST({} AS TEXT) = $1",
            Self::quote(table),
            Self::quote(key_column),
        );
        let params = [Value::String(value_as_key(key_value))];
        let result = bind_values!(sqlx::query(&sql), &params)
            .execute(&self.pool)
            .await
            .context("postgres delete failed")?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, filters))]
    async fn count_records(&self, table: &str, filters: &[FilterExpr]) -> Result<i64> {
        let clause = build_where_clause(filters, SqlDialect::Postgres);
        let sql = format!("SELECT COUNT(*) FROM {}{}", Self::quote(table), clause.sql);
        let query = sqlx::query_scalar::<_, i64>(&sql);
        bind_values!(query, &clause.params)
            .fetch_one(&self.pool)
            .await
            .context("postgres count failed")
    }

    #[instrument(skip(self))]
    async fn search_records(&self, table: &str, query: &str, limit: i64) -> Result<Vec<Record>> {
        let columns = self.search_columns_for(table).await?;
        if columns.is_empty() {
            return Ok(Vec::new());
        }
        let mut clause = WhereClause::default();
        Self::append_search(&mut clause, query, &columns);
        let inner = format!(
            "SELECT * FROM {}{} LIMIT {}",
            Self::quote(table),
            clause.sql,
            limit.max(0),
        );
        self.fetch_json_rows(&inner, &clause.params).await
    }

    #[instrument(skip(self))]
    async fn count_search_matches(&self, table: &str, query: &str) -> Result<i64> {
        let columns = self.search_columns_for(table).await?;
        if columns.is_empty() {
            return Ok(0);
        }
        let mut clause = WhereClause::default();
        Self::append_search(&mut clause, query, &columns);
        let sql = format!("SELECT COUNT(*) FROM {}{}", Self::quote(table), clause.sql);
        let q = sqlx::query_scalar::<_, i64>(&sql);
        bind_values!(q, &clause.params)
            .fetch_one(&self.pool)
            .await
            .context("postgres search count failed")
    }

    #[instrument(skip(self))]
    async fn get_distinct_values(
        &self,
        table: &str,
        column: &str,
        limit: i64,
    ) -> Result<Vec<Value>> {
        let sql = format!(
            "SELECT COALESCE(json_agg(v), '[]'::json) FROM ( \
             SELECT DISTINCT {col} AS v FROM {table} WHERE {col} IS NOT NULL \
             ORDER BY v LIMIT {limit}) q",
            col = Self::quote(column),
            table = Self::quote(table),
            limit = limit.max(0),
        );
        let value: Value = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .context("postgres distinct failed")?;
        Ok(value.as_array().cloned().unwrap_or_default())
    }
}

fn json_array_to_records(value: Value) -> Vec<Record> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect(),
        _ => Vec::new(),
    }
}

fn value_as_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_safe_ident(ident: &str) -> bool {
    !ident.is_empty()
        && ident
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_list_quotes_or_stars() {
        assert_eq!(
            PostgresAdapter::select_list("t", Some(&["a".to_string(), "b".to_string()])),
            r#""t"."a", "t"."b""#
        );
        assert_eq!(PostgresAdapter::select_list("t", None), r#""t".*"#);
    }

    #[test]
    fn order_clause_rejects_unsafe_idents() {
        let mut query = ReadQuery::with_limit(10);
        query.order_by = Some("name; DROP TABLE x".into());
        assert_eq!(PostgresAdapter::order_clause(&query), "");
        query.order_by = Some("created_at".into());
        query.order_direction = Some("desc".into());
        assert_eq!(
            PostgresAdapter::order_clause(&query),
            r#" ORDER BY "created_at" DESC"#
        );
    }

    #[test]
    fn search_block_composes_with_filters() {
        let filters = vec![FilterExpr::new(
            "status",
            crate::filtering::FilterOperator::Eq,
            Value::String("live".into()),
        )];
        let mut clause = build_where_clause(&filters, SqlDialect::Postgres);
        PostgresAdapter::append_search(&mut clause, "abc", &["name".to_string()]);
        assert!(clause.sql.contains("AND (CAST(\"name\" AS TEXT) LIKE $2)"));
        assert_eq!(clause.params.len(), 2);
    }
}
