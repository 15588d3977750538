// MySQL adapter, WordPress-aware: filters on the posts table that name
// meta fields materialize as postmeta JOINs, one alias per filter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, MySqlPool, Row};
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::errors::FrontbaseError;
use crate::filtering::{build_where_clause, FilterExpr, FilterOperator, SqlDialect};
use crate::types::{ColumnDef, Datasource, FkDef, Record, RelationshipRow, TableSchema};

use super::postgres::bind_values;
use super::{sanitize_host, DataAdapter, ReadQuery, RelatedSpec};

/// Columns that live on wp_posts itself; anything else filtered on a
/// posts table is treated as postmeta.
const CORE_POST_COLUMNS: [&str; 7] = [
    "ID",
    "post_author",
    "post_date",
    "post_content",
    "post_title",
    "post_status",
    "post_type",
];

const MAX_SEARCH_COLUMNS: usize = 15;

pub struct MySqlAdapter {
    pool: MySqlPool,
    database: String,
    prefix: String,
}

impl MySqlAdapter {
    pub async fn connect(datasource: &Datasource) -> Result<Self, FrontbaseError> {
        let host_raw = datasource.host.clone().unwrap_or_default();
        let host = sanitize_host(&host_raw).to_string();
        if host.is_empty() {
            return Err(FrontbaseError::Validation(
                "database host is required".to_string(),
            ));
        }
        let database = datasource.database.clone().unwrap_or_default();

        info!(
            "Connecting to MySQL: host='{}', port={:?}, database='{}'",
            host, datasource.port, database
        );

        let mut options = MySqlConnectOptions::new()
            .host(&host)
            .port(datasource.port.unwrap_or(3306) as u16)
            .database(&database);
        if let Some(username) = &datasource.username {
            options = options.username(username);
        }
        if let Some(password) = &datasource.password {
            options = options.password(password);
        }

        let pool = MySqlPoolOptions::new()
            .min_connections(1)
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .test_before_acquire(true)
            .connect_with(options)
            .await
            .map_err(|e| FrontbaseError::connection(e.to_string()))?;

        Ok(Self {
            pool,
            database,
            prefix: datasource.table_prefix.clone(),
        })
    }

    fn quote(ident: &str) -> String {
        format!("`{}`", ident.replace('`', ""))
    }

    fn is_posts_table(&self, table: &str) -> bool {
        table.ends_with("posts")
    }

    fn meta_table(&self) -> String {
        format!("{}postmeta", self.prefix)
    }

    /// Split filters into standard-column conditions and postmeta
    /// conditions, emitting one uniquely aliased JOIN per meta filter.
    fn build_filtered_query(
        &self,
        table: &str,
        base_select: &str,
        filters: &[FilterExpr],
    ) -> (String, Vec<Value>) {
        let mut joins = String::new();
        let mut meta_conditions: Vec<String> = Vec::new();
        let mut meta_params: Vec<Value> = Vec::new();
        let mut standard: Vec<FilterExpr> = Vec::new();

        let is_posts = self.is_posts_table(table);
        let mut meta_index = 0usize;

        for f in filters {
            let is_meta = is_posts
                && (f.field.starts_with('_')
                    || !CORE_POST_COLUMNS.contains(&f.field.as_str()));
            if is_meta {
                let Some(value) = &f.value else { continue };
                let raw = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let alias = format!("m{meta_index}");
                joins.push_str(&format!(
                    " JOIN {} {alias} ON {alias}.post_id = {}.ID",
                    Self::quote(&self.meta_table()),
                    Self::quote(table),
                ));
                match f.operator {
                    FilterOperator::Eq => {
                        meta_conditions
                            .push(format!("{alias}.meta_key = ? AND {alias}.meta_value = ?"));
                        meta_params.push(Value::String(f.field.clone()));
                        meta_params.push(Value::String(raw));
                    }
                    FilterOperator::Contains => {
                        meta_conditions
                            .push(format!("{alias}.meta_key = ? AND {alias}.meta_value LIKE ?"));
                        meta_params.push(Value::String(f.field.clone()));
                        meta_params.push(Value::String(format!("%{raw}%")));
                    }
                    // Other operators do not translate to a meta join;
                    // the predicate is omitted rather than guessed.
                    _ => {
                        debug!(
                            "dropping meta filter on {} with operator {:?}",
                            f.field, f.operator
                        );
                    }
                }
                meta_index += 1;
            } else {
                standard.push(f.clone());
            }
        }

        let clause = build_where_clause(&standard, SqlDialect::Mysql);
        let mut sql = format!("{base_select} FROM {}{joins}", Self::quote(table));
        let mut params = clause.params;

        let mut all_conditions: Vec<String> = Vec::new();
        if !clause.sql.is_empty() {
            all_conditions.push(clause.sql.trim_start_matches(" WHERE ").to_string());
        }
        all_conditions.extend(meta_conditions);
        params.extend(meta_params);

        if !all_conditions.is_empty() {
            sql.push_str(&format!(" WHERE {}", all_conditions.join(" AND ")));
        }
        (sql, params)
    }

    async fn fetch_records(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        debug!(sql, "mysql read");
        let rows: Vec<MySqlRow> = bind_values!(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await
            .context("mysql read failed")?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn text_search_columns(&self, table: &str) -> Result<Vec<String>> {
        let schema = self.get_schema(table).await?;
        let cols: Vec<String> = schema
            .columns
            .into_iter()
            .filter(|c| {
                let t = c.data_type.to_lowercase();
                t.contains("char") || t.contains("text") || t.contains("string")
            })
            .map(|c| c.name)
            .take(MAX_SEARCH_COLUMNS)
            .collect();
        Ok(cols)
    }

    /// Search SQL for a table: WP shortcuts for posts/users, schema-driven
    /// text columns otherwise.
    async fn search_clause(&self, table: &str, query: &str) -> Result<Option<(String, Vec<Value>)>> {
        let like = Value::String(format!("%{query}%"));
        if table == format!("{}posts", self.prefix) {
            return Ok(Some((
                "(post_title LIKE ? OR post_content LIKE ?)".to_string(),
                vec![like.clone(), like],
            )));
        }
        if table == format!("{}users", self.prefix) {
            return Ok(Some((
                "(user_login LIKE ? OR user_email LIKE ? OR display_name LIKE ?)".to_string(),
                vec![like.clone(), like.clone(), like],
            )));
        }
        let columns = self.text_search_columns(table).await?;
        if columns.is_empty() {
            return Ok(None);
        }
        let conditions: Vec<String> = columns
            .iter()
            .map(|c| format!("{} LIKE ?", Self::quote(c)))
            .collect();
        let params = vec![like; columns.len()];
        Ok(Some((format!("({})", conditions.join(" OR ")), params)))
    }
}

#[async_trait]
impl DataAdapter for MySqlAdapter {
    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = sqlx::query_scalar::<_, String>(
            r#"
            SELECT TABLE_NAME
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = ?
            ORDER BY TABLE_NAME
            "#,
        )
        .bind(&self.database)
        .fetch_all(&self.pool)
        .await
        .context("failed to list tables")?;
        Ok(tables)
    }

    #[instrument(skip(self))]
    async fn get_schema(&self, table: &str) -> Result<TableSchema> {
        #[derive(sqlx::FromRow)]
        struct MysqlColumnRow {
            #[sqlx(rename = "COLUMN_NAME")]
            column_name: String,
            #[sqlx(rename = "COLUMN_TYPE")]
            column_type: String,
            #[sqlx(rename = "IS_NULLABLE")]
            is_nullable: String,
            #[sqlx(rename = "COLUMN_DEFAULT")]
            column_default: Option<String>,
            #[sqlx(rename = "COLUMN_KEY")]
            column_key: String,
        }

        #[derive(sqlx::FromRow)]
        struct MysqlFkRow {
            #[sqlx(rename = "COLUMN_NAME")]
            column_name: String,
            #[sqlx(rename = "REFERENCED_TABLE_NAME")]
            referenced_table: String,
            #[sqlx(rename = "REFERENCED_COLUMN_NAME")]
            referenced_column: String,
        }

        let columns = sqlx::query_as::<_, MysqlColumnRow>(
            r#"
            SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT, COLUMN_KEY
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(&self.database)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .context("failed to read column metadata")?;

        let fk_rows = sqlx::query_as::<_, MysqlFkRow>(
            r#"
            SELECT COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ?
              AND TABLE_NAME = ?
              AND REFERENCED_TABLE_NAME IS NOT NULL
            "#,
        )
        .bind(&self.database)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .context("failed to read foreign keys")?;

        let columns = columns
            .into_iter()
            .map(|row| {
                let fk = fk_rows.iter().find(|f| f.column_name == row.column_name);
                ColumnDef {
                    name: row.column_name,
                    data_type: row.column_type,
                    nullable: row.is_nullable == "YES",
                    primary_key: row.column_key == "PRI",
                    default: row.column_default.map(Value::String),
                    is_foreign: fk.is_some(),
                    foreign_table: fk.map(|f| f.referenced_table.clone()),
                    foreign_column: fk.map(|f| f.referenced_column.clone()),
                }
            })
            .collect();

        let foreign_keys = fk_rows
            .into_iter()
            .map(|f| FkDef {
                constrained_columns: vec![f.column_name],
                referred_table: f.referenced_table,
                referred_columns: vec![f.referenced_column],
            })
            .collect();

        Ok(TableSchema {
            columns,
            foreign_keys,
        })
    }

    #[instrument(skip(self))]
    async fn list_all_relationships(&self) -> Result<Vec<RelationshipRow>> {
        #[derive(sqlx::FromRow)]
        struct RelRow {
            source_table: String,
            source_column: String,
            target_table: String,
            target_column: String,
        }

        let rows = sqlx::query_as::<_, RelRow>(
            r#"
            SELECT
                TABLE_NAME AS source_table,
                COLUMN_NAME AS source_column,
                REFERENCED_TABLE_NAME AS target_table,
                REFERENCED_COLUMN_NAME AS target_column
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ?
              AND REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY TABLE_NAME, COLUMN_NAME
            "#,
        )
        .bind(&self.database)
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
        let cols = match &query.columns {
            Some(cols) if !cols.is_empty() => cols
                .iter()
                .map(|c| format!("{}.{}", Self::quote(table), Self::quote(c)))
                .collect::<Vec<_>>()
                .join(", "),
            _ => format!("{}.*", Self::quote(table)),
        };
        let (mut sql, mut params) =
            self.build_filtered_query(table, &format!("SELECT {cols}"), &query.filters);

        if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
            if let Some((clause, search_params)) = self.search_clause(table, search).await? {
                sql.push_str(if sql.contains(" WHERE ") { " AND " } else { " WHERE " });
                sql.push_str(&clause);
                params.extend(search_params);
            }
        }

        if let Some(order_by) = &query.order_by {
            if order_by.chars().all(|c| c.is_alphanumeric() || c == '_') {
                let dir = if query.descending() { "DESC" } else { "ASC" };
                sql.push_str(&format!(" ORDER BY {} {dir}", Self::quote(order_by)));
            }
        }

        sql.push_str(&format!(
            " LIMIT {} OFFSET {}",
            query.limit.max(0),
            query.offset.max(0)
        ));
        self.fetch_records(&sql, &params).await
    }

    #[instrument(skip(self, related, query))]
    async fn read_records_with_relations(
        &self,
        table: &str,
        related: &[RelatedSpec],
        query: &ReadQuery,
    ) -> Result<Vec<Record>> {
        let mut select_parts = vec![match &query.columns {
            Some(cols) if !cols.is_empty() => cols
                .iter()
                .map(|c| format!("{}.{}", Self::quote(table), Self::quote(c)))
                .collect::<Vec<_>>()
                .join(", "),
            _ => format!("{}.*", Self::quote(table)),
        }];
        let mut joins = String::new();
        for spec in related {
            for col in &spec.columns {
                select_parts.push(format!(
                    "{}.{} AS `{}.{}`",
                    Self::quote(&spec.table),
                    Self::quote(col),
                    spec.table.replace('`', ""),
                    col.replace('`', ""),
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

        let clause = build_where_clause(&query.filters, SqlDialect::Mysql);
        let mut sql = format!(
            "SELECT {} FROM {}{joins}{}",
            select_parts.join(", "),
            Self::quote(table),
            clause.sql,
        );
        if let Some(order_by) = &query.order_by {
            if order_by.chars().all(|c| c.is_alphanumeric() || c == '_') {
                let dir = if query.descending() { "DESC" } else { "ASC" };
                sql.push_str(&format!(" ORDER BY {} {dir}", Self::quote(order_by)));
            }
        }
        sql.push_str(&format!(
            " LIMIT {} OFFSET {}",
            query.limit.max(0),
            query.offset.max(0)
        ));
        self.fetch_records(&sql, &clause.params).await
    }

    #[instrument(skip(self, key_value))]
    async fn read_record_by_key(
        &self,
        table: &str,
        key_column: &str,
        key_value: &Value,
    ) -> Result<Option<Record>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ? LIMIT 1",
            Self::quote(table),
            Self::quote(key_column),
        );
        let params = [key_value.clone()];
        let mut rows = self.fetch_records(&sql, &params).await?;
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
        let placeholders = vec!["?"; columns.len()].join(", ");
        let update_cols: Vec<String> = columns
            .iter()
            .filter(|c| c.as_str() != key_column)
            .map(|c| format!("{} = VALUES({})", Self::quote(c), Self::quote(c)))
            .collect();
        let update_clause = if update_cols.is_empty() {
            format!("{} = VALUES({})", Self::quote(key_column), Self::quote(key_column))
        } else {
            update_cols.join(", ")
        };

        let sql = format!(
            "INSERT INTO {} ({col_list}) VALUES ({placeholders}) \
             ON DUPLICATE KEY UPDATE {update_clause}",
            Self::quote(table),
        );
        let params: Vec<Value> = record.values().cloned().collect();
        bind_values!(sqlx::query(&sql), &params)
            .execute(&self.pool)
            .await
            .context("mysql upsert failed")?;

        // MySQL has no RETURNING; re-read by key when we can.
        if let Some(key_value) = record.get(key_column) {
            if let Some(row) = self.read_record_by_key(table, key_column, key_value).await? {
                return Ok(row);
            }
        }
        Ok(record.clone())
    }

    #[instrument(skip(self, key_value))]
    async fn delete_record(
        &self,
        table: &str,
        key_column: &str,
        key_value: &Value,
    ) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            Self::quote(table),
            Self::quote(key_column),
        );
        let params = [key_value.clone()];
        let result = bind_values!(sqlx::query(&sql), &params)
            .execute(&self.pool)
            .await
            .context("mysql delete failed")?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, filters))]
    async fn count_records(&self, table: &str, filters: &[FilterExpr]) -> Result<i64> {
        let (sql, params) = self.build_filtered_query(table, "SELECT COUNT(*)", filters);
        let query = sqlx::query_scalar::<_, i64>(&sql);
        bind_values!(query, &params)
            .fetch_one(&self.pool)
            .await
            .context("mysql count failed")
    }

    #[instrument(skip(self))]
    async fn search_records(&self, table: &str, query: &str, limit: i64) -> Result<Vec<Record>> {
        let Some((clause, params)) = self.search_clause(table, query).await? else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT * FROM {} WHERE {clause} LIMIT {}",
            Self::quote(table),
            limit.max(0),
        );
        self.fetch_records(&sql, &params).await
    }

    #[instrument(skip(self))]
    async fn count_search_matches(&self, table: &str, query: &str) -> Result<i64> {
        let Some((clause, params)) = self.search_clause(table, query).await? else {
            return Ok(0);
        };
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {clause}", Self::quote(table));
        let q = sqlx::query_scalar::<_, i64>(&sql);
        bind_values!(q, &params)
            .fetch_one(&self.pool)
            .await
            .context("mysql search count failed")
    }

    #[instrument(skip(self))]
    async fn get_distinct_values(
        &self,
        table: &str,
        column: &str,
        limit: i64,
    ) -> Result<Vec<Value>> {
        let sql = format!(
            "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL ORDER BY {col} LIMIT {}",
            limit.max(0),
            col = Self::quote(column),
            table = Self::quote(table),
        );
        let rows = self.fetch_records(&sql, &[]).await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.values().next().cloned())
            .collect())
    }
}

/// Decode a MySQL row into JSON, trying concrete types and falling back
/// to the driver's text representation for anything exotic (DECIMAL,
/// SET, spatial types).
fn row_to_record(row: &MySqlRow) -> Record {
    let mut record = Record::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(index) {
            Value::Number(v.into())
        } else if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(index) {
            Value::Number(v.into())
        } else if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(index) {
            serde_json::Number::from_f64(v)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        } else if let Ok(Some(v)) = row.try_get::<Option<bool>, _>(index) {
            Value::Bool(v)
        } else if let Ok(Some(v)) = row.try_get::<Option<String>, _>(index) {
            Value::String(v)
        } else if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
            Value::String(v.to_string())
        } else if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
            Value::String(v.to_string())
        } else if let Ok(Some(v)) = row.try_get_unchecked::<Option<String>, _>(index) {
            Value::String(v)
        } else {
            Value::Null
        };
        record.insert(column.name().to_string(), value);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter_parts() -> (String, String) {
        ("wp_".to_string(), "wp_posts".to_string())
    }

    #[tokio::test]
    async fn meta_filters_join_postmeta_with_unique_aliases() {
        let (prefix, table) = adapter_parts();
        // Exercise the pure query builder without a live pool.
        let adapter = MySqlAdapter {
            pool: MySqlPool::connect_lazy("mysql://u@localhost/db").unwrap(),
            database: "db".to_string(),
            prefix,
        };
        let filters = vec![
            FilterExpr::new("_listing_type", FilterOperator::Eq, json!("job")),
            FilterExpr::new("_featured", FilterOperator::Contains, json!("yes")),
            FilterExpr::new("post_status", FilterOperator::Eq, json!("publish")),
        ];
        let (sql, params) = adapter.build_filtered_query(&table, "SELECT COUNT(*)", &filters);

        assert!(sql.contains("JOIN `wp_postmeta` m0 ON m0.post_id = `wp_posts`.ID"));
        assert!(sql.contains("JOIN `wp_postmeta` m1 ON m1.post_id = `wp_posts`.ID"));
        assert!(sql.contains("m0.meta_key = ? AND m0.meta_value = ?"));
        assert!(sql.contains("m1.meta_key = ? AND m1.meta_value LIKE ?"));
        assert!(sql.contains("CAST(`post_status` AS CHAR) = ?"));
        // standard params first, then meta pairs in filter order
        assert_eq!(
            params,
            vec![
                json!("publish"),
                json!("_listing_type"),
                json!("job"),
                json!("_featured"),
                json!("%yes%"),
            ]
        );
    }

    #[tokio::test]
    async fn non_posts_tables_never_meta_join() {
        let adapter = MySqlAdapter {
            pool: MySqlPool::connect_lazy("mysql://u@localhost/db").unwrap(),
            database: "db".to_string(),
            prefix: "wp_".to_string(),
        };
        let filters = vec![FilterExpr::new("custom", FilterOperator::Eq, json!("x"))];
        let (sql, _) = adapter.build_filtered_query("inventory", "SELECT *", &filters);
        assert!(!sql.contains("postmeta"));
        assert!(sql.contains("CAST(`custom` AS CHAR) = ?"));
    }
}
