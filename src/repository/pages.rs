// Read access to the page table plus the post-publish state flip.
// Page authoring CRUD lives outside the core.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::instrument;

use crate::types::Page;

use super::CoreStore;

#[derive(Debug, sqlx::FromRow)]
struct PageRow {
    id: String,
    slug: String,
    name: String,
    title: Option<String>,
    description: Option<String>,
    layout_data: Value,
    seo_data: Option<Value>,
    is_public: bool,
    is_homepage: bool,
    published_version: i64,
}

const PAGE_COLUMNS: &str = r#"
    id, slug, name, title, description, layout_data, seo_data,
    is_public, is_homepage, published_version
"#;

impl From<PageRow> for Page {
    fn from(row: PageRow) -> Self {
        Page {
            id: row.id,
            slug: row.slug,
            name: row.name,
            title: row.title,
            description: row.description,
            layout_data: row.layout_data,
            seo_data: row.seo_data,
            is_public: row.is_public,
            is_homepage: row.is_homepage,
            published_version: row.published_version,
        }
    }
}

impl CoreStore {
    #[instrument(skip(self))]
    pub async fn get_page(&self, page_id: &str) -> Result<Option<Page>> {
        let row = sqlx::query_as::<_, PageRow>(&format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(page_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch page")?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    pub async fn get_page_by_slug(&self, slug: &str) -> Result<Option<Page>> {
        let row = sqlx::query_as::<_, PageRow>(&format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE slug = $1 AND deleted_at IS NULL"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch page by slug")?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    pub async fn get_homepage(&self) -> Result<Option<Page>> {
        let row = sqlx::query_as::<_, PageRow>(&format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE is_homepage = TRUE AND deleted_at IS NULL LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch homepage")?;
        Ok(row.map(Into::into))
    }

    /// Flip the page public and record the delivered version. Runs in
    /// its own short session strictly after strategy delivery succeeds.
    #[instrument(skip(self))]
    pub async fn mark_page_published(&self, page_id: &str, version: i64) -> Result<()> {
        sqlx::query(
            "UPDATE pages SET is_public = TRUE, published_version = $2 WHERE id = $1",
        )
        .bind(page_id)
        .bind(version)
        .execute(&self.pool)
        .await
        .context("failed to mark page published")?;
        Ok(())
    }
}
