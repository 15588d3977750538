// Core relational store. Owns the datasource registry, schema cache
// rows, views, sync configs/jobs/conflicts, project settings, and the
// page table the publish compiler reads from.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{info, instrument};

use crate::secrets::SecretBox;
use crate::types::{Datasource, DatasourceKind};

pub mod pages;
pub mod project;
pub mod schema_entries;
pub mod sync_store;
pub mod views;

/// Handle over the core store. Cheap to clone; all methods borrow.
#[derive(Clone)]
pub struct CoreStore {
    pool: PgPool,
    secrets: SecretBox,
}

/// Connect to the core store and bootstrap its schema.
pub async fn create_core_store(database_url: &str, secrets: SecretBox) -> Result<CoreStore> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await
        .context("failed to connect to core store")?;

    let store = CoreStore { pool, secrets };
    store.init_schema().await?;
    Ok(store)
}

impl CoreStore {
    pub fn new(pool: PgPool, secrets: SecretBox) -> Self {
        Self { pool, secrets }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) fn secrets(&self) -> &SecretBox {
        &self.secrets
    }

    /// Create the core tables when absent. The final shape is ground
    /// truth; there is no migration history to replay.
    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS datasources (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                host TEXT,
                port INTEGER,
                database_name TEXT,
                username TEXT,
                password_encrypted TEXT,
                api_url TEXT,
                api_key_encrypted TEXT,
                anon_key TEXT,
                table_prefix TEXT NOT NULL DEFAULT 'wp_',
                active BOOLEAN NOT NULL DEFAULT TRUE,
                last_tested_at TIMESTAMPTZ,
                last_test_success BOOLEAN,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS table_schema_cache (
                id TEXT PRIMARY KEY,
                datasource_id TEXT NOT NULL REFERENCES datasources(id) ON DELETE CASCADE,
                table_name TEXT NOT NULL,
                columns JSONB NOT NULL,
                foreign_keys JSONB NOT NULL DEFAULT '[]',
                fetched_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (datasource_id, table_name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS datasource_views (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                datasource_id TEXT NOT NULL REFERENCES datasources(id) ON DELETE CASCADE,
                target_table TEXT NOT NULL,
                filters JSONB NOT NULL DEFAULT '[]',
                field_mappings JSONB NOT NULL DEFAULT '{}',
                linked_views JSONB NOT NULL DEFAULT '{}',
                visible_columns JSONB NOT NULL DEFAULT '[]',
                pinned_columns JSONB NOT NULL DEFAULT '[]',
                column_order JSONB NOT NULL DEFAULT '[]',
                webhooks JSONB NOT NULL DEFAULT '[]',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sync_configs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                master_datasource_id TEXT NOT NULL REFERENCES datasources(id),
                slave_datasource_id TEXT NOT NULL REFERENCES datasources(id),
                master_view_id TEXT REFERENCES datasource_views(id),
                slave_view_id TEXT REFERENCES datasource_views(id),
                master_table TEXT NOT NULL,
                slave_table TEXT NOT NULL,
                master_pk_column TEXT NOT NULL DEFAULT 'id',
                slave_pk_column TEXT NOT NULL DEFAULT 'id',
                conflict_strategy TEXT NOT NULL DEFAULT 'source_wins',
                webhook_url TEXT,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                sync_deletes BOOLEAN NOT NULL DEFAULT FALSE,
                batch_size INTEGER NOT NULL DEFAULT 100,
                cron_schedule TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                last_sync_at TIMESTAMPTZ
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS field_mappings (
                id TEXT PRIMARY KEY,
                sync_config_id TEXT NOT NULL REFERENCES sync_configs(id) ON DELETE CASCADE,
                master_column TEXT NOT NULL,
                slave_column TEXT NOT NULL,
                transform TEXT,
                is_key_field BOOLEAN NOT NULL DEFAULT FALSE,
                skip_sync BOOLEAN NOT NULL DEFAULT FALSE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sync_jobs (
                id TEXT PRIMARY KEY,
                sync_config_id TEXT NOT NULL REFERENCES sync_configs(id) ON DELETE CASCADE,
                status TEXT NOT NULL DEFAULT 'pending',
                total_records BIGINT NOT NULL DEFAULT 0,
                processed_records BIGINT NOT NULL DEFAULT 0,
                inserted_records BIGINT NOT NULL DEFAULT 0,
                updated_records BIGINT NOT NULL DEFAULT 0,
                deleted_records BIGINT NOT NULL DEFAULT 0,
                conflict_count BIGINT NOT NULL DEFAULT 0,
                error_count BIGINT NOT NULL DEFAULT 0,
                error_message TEXT,
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                triggered_by TEXT NOT NULL DEFAULT 'manual'
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS conflicts (
                id TEXT PRIMARY KEY,
                sync_config_id TEXT NOT NULL REFERENCES sync_configs(id) ON DELETE CASCADE,
                job_id TEXT NOT NULL REFERENCES sync_jobs(id) ON DELETE CASCADE,
                record_key TEXT NOT NULL,
                master_data JSONB NOT NULL,
                slave_data JSONB NOT NULL,
                conflicting_fields JSONB NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                resolved_data JSONB,
                resolved_by TEXT,
                resolved_at TIMESTAMPTZ,
                resolution_notes TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pages (
                id TEXT PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                title TEXT,
                description TEXT,
                layout_data JSONB NOT NULL DEFAULT '{}',
                seo_data JSONB,
                is_public BOOLEAN NOT NULL DEFAULT FALSE,
                is_homepage BOOLEAN NOT NULL DEFAULT FALSE,
                published_version BIGINT NOT NULL DEFAULT 0,
                deleted_at TIMESTAMPTZ
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS project_settings (
                id TEXT PRIMARY KEY DEFAULT 'default',
                redis_url TEXT,
                redis_token TEXT,
                redis_type TEXT NOT NULL DEFAULT 'upstash',
                redis_enabled BOOLEAN NOT NULL DEFAULT FALSE,
                cache_ttl_data BIGINT NOT NULL DEFAULT 60,
                cache_ttl_count BIGINT NOT NULL DEFAULT 300,
                favicon_url TEXT,
                logo_url TEXT,
                site_name TEXT,
                site_description TEXT,
                app_url TEXT,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("failed to bootstrap core schema")?;
        }
        info!("Core store schema ready");
        Ok(())
    }
}

/// New-datasource input. Secrets arrive in plaintext and are encrypted
/// before they touch the store.
#[derive(Debug, Clone, Default)]
pub struct NewDatasource {
    pub name: String,
    pub kind: DatasourceKind,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub anon_key: Option<String>,
    pub table_prefix: Option<String>,
}

/// Field-level patch for datasource updates. `None` leaves the stored
/// value untouched; credentials mutate only when explicitly provided.
#[derive(Debug, Clone, Default)]
pub struct DatasourcePatch {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub anon_key: Option<String>,
    pub table_prefix: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, sqlx::FromRow)]
struct DatasourceRow {
    id: String,
    name: String,
    kind: String,
    host: Option<String>,
    port: Option<i32>,
    database_name: Option<String>,
    username: Option<String>,
    password_encrypted: Option<String>,
    api_url: Option<String>,
    api_key_encrypted: Option<String>,
    anon_key: Option<String>,
    table_prefix: String,
    active: bool,
    last_tested_at: Option<DateTime<Utc>>,
    last_test_success: Option<bool>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const DATASOURCE_COLUMNS: &str = r#"
    id, name, kind, host, port, database_name, username, password_encrypted,
    api_url, api_key_encrypted, anon_key, table_prefix, active,
    last_tested_at, last_test_success, created_at, updated_at
"#;

impl DatasourceRow {
    fn into_domain(self, secrets: &SecretBox) -> Result<Datasource> {
        Ok(Datasource {
            kind: self.kind.parse()?,
            password: secrets.decrypt_opt(self.password_encrypted.as_deref())?,
            service_key: secrets.decrypt_opt(self.api_key_encrypted.as_deref())?,
            id: self.id,
            name: self.name,
            host: self.host,
            port: self.port,
            database: self.database_name,
            username: self.username,
            api_url: self.api_url,
            anon_key: self.anon_key,
            table_prefix: self.table_prefix,
            active: self.active,
            last_tested_at: self.last_tested_at,
            last_test_success: self.last_test_success,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl CoreStore {
    #[instrument(skip(self, input))]
    pub async fn create_datasource(&self, input: NewDatasource) -> Result<Datasource> {
        let id = uuid::Uuid::new_v4().to_string();
        let password_encrypted = self.secrets.encrypt_opt(input.password.as_deref())?;
        let api_key_encrypted = self.secrets.encrypt_opt(input.api_key.as_deref())?;

        let row = sqlx::query_as::<_, DatasourceRow>(&format!(
            r#"
            INSERT INTO datasources (
                id, name, kind, host, port, database_name, username,
                password_encrypted, api_url, api_key_encrypted, anon_key, table_prefix
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {DATASOURCE_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&input.name)
        .bind(input.kind.as_str())
        .bind(&input.host)
        .bind(input.port)
        .bind(&input.database)
        .bind(&input.username)
        .bind(&password_encrypted)
        .bind(&input.api_url)
        .bind(&api_key_encrypted)
        .bind(&input.anon_key)
        .bind(input.table_prefix.as_deref().unwrap_or("wp_"))
        .fetch_one(&self.pool)
        .await
        .context("failed to insert datasource")?;

        row.into_domain(&self.secrets)
    }

    #[instrument(skip(self))]
    pub async fn list_datasources(&self) -> Result<Vec<Datasource>> {
        let rows = sqlx::query_as::<_, DatasourceRow>(&format!(
            "SELECT {DATASOURCE_COLUMNS} FROM datasources ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("failed to list datasources")?;

        rows.into_iter()
            .map(|r| r.into_domain(&self.secrets))
            .collect()
    }

    #[instrument(skip(self))]
    pub async fn list_active_datasources(&self) -> Result<Vec<Datasource>> {
        let rows = sqlx::query_as::<_, DatasourceRow>(&format!(
            "SELECT {DATASOURCE_COLUMNS} FROM datasources WHERE active = TRUE ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("failed to list active datasources")?;

        rows.into_iter()
            .map(|r| r.into_domain(&self.secrets))
            .collect()
    }

    #[instrument(skip(self))]
    pub async fn get_datasource(&self, id: &str) -> Result<Option<Datasource>> {
        let row = sqlx::query_as::<_, DatasourceRow>(&format!(
            "SELECT {DATASOURCE_COLUMNS} FROM datasources WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch datasource")?;

        row.map(|r| r.into_domain(&self.secrets)).transpose()
    }

    #[instrument(skip(self))]
    pub async fn datasource_name_exists(&self, name: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM datasources WHERE name = $1",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .context("failed to check datasource name")?;
        Ok(count > 0)
    }

    #[instrument(skip(self, patch))]
    pub async fn update_datasource(
        &self,
        id: &str,
        patch: DatasourcePatch,
    ) -> Result<Option<Datasource>> {
        let password_encrypted = self.secrets.encrypt_opt(patch.password.as_deref())?;
        let api_key_encrypted = self.secrets.encrypt_opt(patch.api_key.as_deref())?;

        let row = sqlx::query_as::<_, DatasourceRow>(&format!(
            r#"
            UPDATE datasources
            SET name = COALESCE($2, name),
                host = COALESCE($3, host),
                port = COALESCE($4, port),
                database_name = COALESCE($5, database_name),
                username = COALESCE($6, username),
                password_encrypted = COALESCE($7, password_encrypted),
                api_url = COALESCE($8, api_url),
                api_key_encrypted = COALESCE($9, api_key_encrypted),
                anon_key = COALESCE($10, anon_key),
                table_prefix = COALESCE($11, table_prefix),
                active = COALESCE($12, active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {DATASOURCE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&patch.name)
        .bind(&patch.host)
        .bind(patch.port)
        .bind(&patch.database)
        .bind(&patch.username)
        .bind(&password_encrypted)
        .bind(&patch.api_url)
        .bind(&api_key_encrypted)
        .bind(&patch.anon_key)
        .bind(&patch.table_prefix)
        .bind(patch.active)
        .fetch_optional(&self.pool)
        .await
        .context("failed to update datasource")?;

        row.map(|r| r.into_domain(&self.secrets)).transpose()
    }

    #[instrument(skip(self))]
    pub async fn delete_datasource(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM datasources WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to delete datasource")?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    pub async fn mark_datasource_tested(&self, id: &str, success: bool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE datasources
            SET last_tested_at = NOW(), last_test_success = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(success)
        .execute(&self.pool)
        .await
        .context("failed to record datasource test result")?;
        Ok(())
    }
}
