// Schema-cache rows: one per (datasource, table), written whole.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::instrument;

use crate::types::TableSchema;

use super::CoreStore;

#[derive(Debug, sqlx::FromRow)]
struct SchemaEntryRow {
    table_name: String,
    columns: Value,
    foreign_keys: Value,
}

impl SchemaEntryRow {
    fn into_schema(self) -> Result<(String, TableSchema)> {
        let columns = serde_json::from_value(self.columns)
            .context("cached columns are malformed")?;
        let foreign_keys = serde_json::from_value(self.foreign_keys)
            .context("cached foreign keys are malformed")?;
        Ok((
            self.table_name,
            TableSchema {
                columns,
                foreign_keys,
            },
        ))
    }
}

impl CoreStore {
    /// Write a table's schema as one atomic upsert. Entries are never
    /// written piecemeal.
    #[instrument(skip(self, schema))]
    pub async fn upsert_schema_entry(
        &self,
        datasource_id: &str,
        table_name: &str,
        schema: &TableSchema,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO table_schema_cache (id, datasource_id, table_name, columns, foreign_keys, fetched_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (datasource_id, table_name)
            DO UPDATE SET columns = EXCLUDED.columns,
                          foreign_keys = EXCLUDED.foreign_keys,
                          fetched_at = NOW()
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(datasource_id)
        .bind(table_name)
        .bind(serde_json::to_value(&schema.columns)?)
        .bind(serde_json::to_value(&schema.foreign_keys)?)
        .execute(&self.pool)
        .await
        .context("failed to upsert schema cache entry")?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_schema_entry(
        &self,
        datasource_id: &str,
        table_name: &str,
    ) -> Result<Option<TableSchema>> {
        let row = sqlx::query_as::<_, SchemaEntryRow>(
            r#"
            SELECT table_name, columns, foreign_keys
            FROM table_schema_cache
            WHERE datasource_id = $1 AND table_name = $2
            "#,
        )
        .bind(datasource_id)
        .bind(table_name)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch schema cache entry")?;

        row.map(|r| r.into_schema().map(|(_, s)| s)).transpose()
    }

    #[instrument(skip(self))]
    pub async fn list_schema_entries(
        &self,
        datasource_id: &str,
    ) -> Result<Vec<(String, TableSchema)>> {
        let rows = sqlx::query_as::<_, SchemaEntryRow>(
            r#"
            SELECT table_name, columns, foreign_keys
            FROM table_schema_cache
            WHERE datasource_id = $1
            ORDER BY table_name
            "#,
        )
        .bind(datasource_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list schema cache entries")?;

        rows.into_iter().map(SchemaEntryRow::into_schema).collect()
    }

    #[instrument(skip(self))]
    pub async fn delete_schema_entries(&self, datasource_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM table_schema_cache WHERE datasource_id = $1")
            .bind(datasource_id)
            .execute(&self.pool)
            .await
            .context("failed to clear schema cache entries")?;
        Ok(result.rows_affected())
    }
}
