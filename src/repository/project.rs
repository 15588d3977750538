// Singleton project settings row.

use anyhow::{Context, Result};
use tracing::instrument;

use crate::types::ProjectSettings;

use super::CoreStore;

#[derive(Debug, sqlx::FromRow)]
struct SettingsRow {
    redis_url: Option<String>,
    redis_token: Option<String>,
    redis_type: String,
    redis_enabled: bool,
    cache_ttl_data: i64,
    cache_ttl_count: i64,
    favicon_url: Option<String>,
    logo_url: Option<String>,
    site_name: Option<String>,
    site_description: Option<String>,
    app_url: Option<String>,
}

const SETTINGS_COLUMNS: &str = r#"
    redis_url, redis_token, redis_type, redis_enabled, cache_ttl_data,
    cache_ttl_count, favicon_url, logo_url, site_name, site_description, app_url
"#;

impl From<SettingsRow> for ProjectSettings {
    fn from(row: SettingsRow) -> Self {
        ProjectSettings {
            redis_url: row.redis_url,
            redis_token: row.redis_token,
            redis_type: row.redis_type,
            redis_enabled: row.redis_enabled,
            cache_ttl_data: row.cache_ttl_data,
            cache_ttl_count: row.cache_ttl_count,
            favicon_url: row.favicon_url,
            logo_url: row.logo_url,
            site_name: row.site_name,
            site_description: row.site_description,
            app_url: row.app_url,
        }
    }
}

impl CoreStore {
    #[instrument(skip(self))]
    pub async fn load_project_settings(&self) -> Result<Option<ProjectSettings>> {
        let row = sqlx::query_as::<_, SettingsRow>(&format!(
            "SELECT {SETTINGS_COLUMNS} FROM project_settings LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .context("failed to load project settings")?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, settings))]
    pub async fn save_project_settings(
        &self,
        settings: &ProjectSettings,
    ) -> Result<ProjectSettings> {
        let row = sqlx::query_as::<_, SettingsRow>(&format!(
            r#"
            INSERT INTO project_settings (
                id, redis_url, redis_token, redis_type, redis_enabled,
                cache_ttl_data, cache_ttl_count, favicon_url, logo_url,
                site_name, site_description, app_url, updated_at
            )
            VALUES ('default', $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT (id)
            DO UPDATE SET redis_url = EXCLUDED.redis_url,
                          redis_token = EXCLUDED.redis_token,
                          redis_type = EXCLUDED.redis_type,
                          redis_enabled = EXCLUDED.redis_enabled,
                          cache_ttl_data = EXCLUDED.cache_ttl_data,
                          cache_ttl_count = EXCLUDED.cache_ttl_count,
                          favicon_url = EXCLUDED.favicon_url,
                          logo_url = EXCLUDED.logo_url,
                          site_name = EXCLUDED.site_name,
                          site_description = EXCLUDED.site_description,
                          app_url = EXCLUDED.app_url,
                          updated_at = NOW()
            RETURNING {SETTINGS_COLUMNS}
            "#
        ))
        .bind(&settings.redis_url)
        .bind(&settings.redis_token)
        .bind(&settings.redis_type)
        .bind(settings.redis_enabled)
        .bind(settings.cache_ttl_data)
        .bind(settings.cache_ttl_count)
        .bind(&settings.favicon_url)
        .bind(&settings.logo_url)
        .bind(&settings.site_name)
        .bind(&settings.site_description)
        .bind(&settings.app_url)
        .fetch_one(&self.pool)
        .await
        .context("failed to save project settings")?;

        Ok(row.into())
    }
}
