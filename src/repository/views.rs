// Persistence for saved datasource views.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::instrument;

use crate::types::DatasourceView;

use super::CoreStore;

#[derive(Debug, sqlx::FromRow)]
struct ViewRow {
    id: String,
    name: String,
    description: Option<String>,
    datasource_id: String,
    target_table: String,
    filters: Value,
    field_mappings: Value,
    linked_views: Value,
    visible_columns: Value,
    pinned_columns: Value,
    column_order: Value,
    webhooks: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const VIEW_COLUMNS: &str = r#"
    id, name, description, datasource_id, target_table, filters, field_mappings,
    linked_views, visible_columns, pinned_columns, column_order, webhooks,
    created_at, updated_at
"#;

fn string_list(value: Value) -> Vec<String> {
    serde_json::from_value(value).unwrap_or_default()
}

impl ViewRow {
    fn into_domain(self) -> DatasourceView {
        DatasourceView {
            id: self.id,
            name: self.name,
            description: self.description,
            datasource_id: self.datasource_id,
            target_table: self.target_table,
            filters: self.filters,
            field_mappings: self.field_mappings,
            linked_views: self.linked_views,
            visible_columns: string_list(self.visible_columns),
            pinned_columns: string_list(self.pinned_columns),
            column_order: string_list(self.column_order),
            webhooks: self.webhooks,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Input for creating a view. JSON fields default to their empty shapes.
#[derive(Debug, Clone, Default)]
pub struct NewView {
    pub name: String,
    pub description: Option<String>,
    pub datasource_id: String,
    pub target_table: String,
    pub filters: Option<Value>,
    pub field_mappings: Option<Value>,
    pub linked_views: Option<Value>,
    pub visible_columns: Option<Vec<String>>,
    pub pinned_columns: Option<Vec<String>>,
    pub column_order: Option<Vec<String>>,
    pub webhooks: Option<Value>,
}

/// Partial view update; `None` fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct ViewPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub target_table: Option<String>,
    pub filters: Option<Value>,
    pub field_mappings: Option<Value>,
    pub linked_views: Option<Value>,
    pub visible_columns: Option<Vec<String>>,
    pub pinned_columns: Option<Vec<String>>,
    pub column_order: Option<Vec<String>>,
    pub webhooks: Option<Value>,
}

impl CoreStore {
    #[instrument(skip(self, input))]
    pub async fn create_view(&self, input: NewView) -> Result<DatasourceView> {
        let row = sqlx::query_as::<_, ViewRow>(&format!(
            r#"
            INSERT INTO datasource_views (
                id, name, description, datasource_id, target_table, filters,
                field_mappings, linked_views, visible_columns, pinned_columns,
                column_order, webhooks
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {VIEW_COLUMNS}
            "#
        ))
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.datasource_id)
        .bind(&input.target_table)
        .bind(input.filters.unwrap_or_else(|| Value::Array(vec![])))
        .bind(
            input
                .field_mappings
                .unwrap_or_else(|| Value::Object(Default::default())),
        )
        .bind(
            input
                .linked_views
                .unwrap_or_else(|| Value::Object(Default::default())),
        )
        .bind(serde_json::to_value(input.visible_columns.unwrap_or_default())?)
        .bind(serde_json::to_value(input.pinned_columns.unwrap_or_default())?)
        .bind(serde_json::to_value(input.column_order.unwrap_or_default())?)
        .bind(input.webhooks.unwrap_or_else(|| Value::Array(vec![])))
        .fetch_one(&self.pool)
        .await
        .context("failed to insert view")?;

        Ok(row.into_domain())
    }

    #[instrument(skip(self))]
    pub async fn list_views(&self, datasource_id: &str) -> Result<Vec<DatasourceView>> {
        let rows = sqlx::query_as::<_, ViewRow>(&format!(
            "SELECT {VIEW_COLUMNS} FROM datasource_views WHERE datasource_id = $1 ORDER BY created_at DESC"
        ))
        .bind(datasource_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list views")?;

        Ok(rows.into_iter().map(ViewRow::into_domain).collect())
    }

    #[instrument(skip(self))]
    pub async fn get_view(&self, view_id: &str) -> Result<Option<DatasourceView>> {
        let row = sqlx::query_as::<_, ViewRow>(&format!(
            "SELECT {VIEW_COLUMNS} FROM datasource_views WHERE id = $1"
        ))
        .bind(view_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch view")?;

        Ok(row.map(ViewRow::into_domain))
    }

    #[instrument(skip(self))]
    pub async fn view_name_exists(&self, name: &str, exclude_id: Option<&str>) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM datasource_views WHERE name = $1 AND ($2::TEXT IS NULL OR id != $2)",
        )
        .bind(name)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to check view name")?;
        Ok(count > 0)
    }

    #[instrument(skip(self, patch))]
    pub async fn update_view(
        &self,
        view_id: &str,
        patch: ViewPatch,
    ) -> Result<Option<DatasourceView>> {
        let visible = patch
            .visible_columns
            .map(serde_json::to_value)
            .transpose()?;
        let pinned = patch.pinned_columns.map(serde_json::to_value).transpose()?;
        let order = patch.column_order.map(serde_json::to_value).transpose()?;

        let row = sqlx::query_as::<_, ViewRow>(&format!(
            r#"
            UPDATE datasource_views
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                target_table = COALESCE($4, target_table),
                filters = COALESCE($5, filters),
                field_mappings = COALESCE($6, field_mappings),
                linked_views = COALESCE($7, linked_views),
                visible_columns = COALESCE($8, visible_columns),
                pinned_columns = COALESCE($9, pinned_columns),
                column_order = COALESCE($10, column_order),
                webhooks = COALESCE($11, webhooks),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {VIEW_COLUMNS}
            "#
        ))
        .bind(view_id)
        .bind(&patch.name)
        .bind(&patch.description)
        .bind(&patch.target_table)
        .bind(&patch.filters)
        .bind(&patch.field_mappings)
        .bind(&patch.linked_views)
        .bind(&visible)
        .bind(&pinned)
        .bind(&order)
        .bind(&patch.webhooks)
        .fetch_optional(&self.pool)
        .await
        .context("failed to update view")?;

        Ok(row.map(ViewRow::into_domain))
    }

    #[instrument(skip(self))]
    pub async fn delete_view(&self, view_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM datasource_views WHERE id = $1")
            .bind(view_id)
            .execute(&self.pool)
            .await
            .context("failed to delete view")?;
        Ok(result.rows_affected() > 0)
    }
}
