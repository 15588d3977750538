// Persistence for sync configs, field mappings, jobs, and conflicts.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::instrument;

use crate::types::{ConflictResolutionStatus, ConflictRow, FieldMapping, SyncConfig, SyncJob};

use super::CoreStore;

#[derive(Debug, sqlx::FromRow)]
struct SyncConfigRow {
    id: String,
    name: String,
    description: Option<String>,
    master_datasource_id: String,
    slave_datasource_id: String,
    master_view_id: Option<String>,
    slave_view_id: Option<String>,
    master_table: String,
    slave_table: String,
    master_pk_column: String,
    slave_pk_column: String,
    conflict_strategy: String,
    webhook_url: Option<String>,
    active: bool,
    sync_deletes: bool,
    batch_size: i32,
    cron_schedule: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_sync_at: Option<DateTime<Utc>>,
}

const SYNC_CONFIG_COLUMNS: &str = r#"
    id, name, description, master_datasource_id, slave_datasource_id,
    master_view_id, slave_view_id, master_table, slave_table,
    master_pk_column, slave_pk_column, conflict_strategy, webhook_url,
    active, sync_deletes, batch_size, cron_schedule,
    created_at, updated_at, last_sync_at
"#;

impl SyncConfigRow {
    fn into_domain(self, field_mappings: Vec<FieldMapping>) -> Result<SyncConfig> {
        Ok(SyncConfig {
            conflict_strategy: self.conflict_strategy.parse()?,
            id: self.id,
            name: self.name,
            description: self.description,
            master_datasource_id: self.master_datasource_id,
            slave_datasource_id: self.slave_datasource_id,
            master_view_id: self.master_view_id,
            slave_view_id: self.slave_view_id,
            master_table: self.master_table,
            slave_table: self.slave_table,
            master_pk_column: self.master_pk_column,
            slave_pk_column: self.slave_pk_column,
            webhook_url: self.webhook_url,
            active: self.active,
            sync_deletes: self.sync_deletes,
            batch_size: self.batch_size,
            cron_schedule: self.cron_schedule,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_sync_at: self.last_sync_at,
            field_mappings,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FieldMappingRow {
    id: String,
    sync_config_id: String,
    master_column: String,
    slave_column: String,
    transform: Option<String>,
    is_key_field: bool,
    skip_sync: bool,
}

impl From<FieldMappingRow> for FieldMapping {
    fn from(row: FieldMappingRow) -> Self {
        FieldMapping {
            id: row.id,
            sync_config_id: row.sync_config_id,
            master_column: row.master_column,
            slave_column: row.slave_column,
            transform: row.transform,
            is_key_field: row.is_key_field,
            skip_sync: row.skip_sync,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SyncJobRow {
    id: String,
    sync_config_id: String,
    status: String,
    total_records: i64,
    processed_records: i64,
    inserted_records: i64,
    updated_records: i64,
    deleted_records: i64,
    conflict_count: i64,
    error_count: i64,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    triggered_by: String,
}

const SYNC_JOB_COLUMNS: &str = r#"
    id, sync_config_id, status, total_records, processed_records,
    inserted_records, updated_records, deleted_records, conflict_count,
    error_count, error_message, started_at, completed_at, created_at,
    triggered_by
"#;

impl SyncJobRow {
    fn into_domain(self) -> Result<SyncJob> {
        Ok(SyncJob {
            status: self.status.parse()?,
            id: self.id,
            sync_config_id: self.sync_config_id,
            total_records: self.total_records,
            processed_records: self.processed_records,
            inserted_records: self.inserted_records,
            updated_records: self.updated_records,
            deleted_records: self.deleted_records,
            conflict_count: self.conflict_count,
            error_count: self.error_count,
            error_message: self.error_message,
            started_at: self.started_at,
            completed_at: self.completed_at,
            created_at: self.created_at,
            triggered_by: self.triggered_by,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ConflictRowDb {
    id: String,
    sync_config_id: String,
    job_id: String,
    record_key: String,
    master_data: Value,
    slave_data: Value,
    conflicting_fields: Value,
    status: String,
    resolved_data: Option<Value>,
    resolved_by: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
    resolution_notes: Option<String>,
    created_at: DateTime<Utc>,
}

const CONFLICT_COLUMNS: &str = r#"
    id, sync_config_id, job_id, record_key, master_data, slave_data,
    conflicting_fields, status, resolved_data, resolved_by, resolved_at,
    resolution_notes, created_at
"#;

impl ConflictRowDb {
    fn into_domain(self) -> Result<ConflictRow> {
        Ok(ConflictRow {
            status: self.status.parse()?,
            conflicting_fields: serde_json::from_value(self.conflicting_fields)
                .context("conflicting_fields is malformed")?,
            id: self.id,
            sync_config_id: self.sync_config_id,
            job_id: self.job_id,
            record_key: self.record_key,
            master_data: self.master_data,
            slave_data: self.slave_data,
            resolved_data: self.resolved_data,
            resolved_by: self.resolved_by,
            resolved_at: self.resolved_at,
            resolution_notes: self.resolution_notes,
            created_at: self.created_at,
        })
    }
}

/// Input for creating a sync config with its mappings in one shot.
#[derive(Debug, Clone)]
pub struct NewSyncConfig {
    pub name: String,
    pub description: Option<String>,
    pub master_datasource_id: String,
    pub slave_datasource_id: String,
    pub master_view_id: Option<String>,
    pub slave_view_id: Option<String>,
    pub master_table: String,
    pub slave_table: String,
    pub master_pk_column: String,
    pub slave_pk_column: String,
    pub conflict_strategy: String,
    pub webhook_url: Option<String>,
    pub sync_deletes: bool,
    pub batch_size: i32,
    pub cron_schedule: Option<String>,
    pub field_mappings: Vec<NewFieldMapping>,
}

#[derive(Debug, Clone)]
pub struct NewFieldMapping {
    pub master_column: String,
    pub slave_column: String,
    pub transform: Option<String>,
    pub is_key_field: bool,
    pub skip_sync: bool,
}

impl CoreStore {
    #[instrument(skip(self, input))]
    pub async fn create_sync_config(&self, input: NewSyncConfig) -> Result<SyncConfig> {
        let mut tx = self.pool.begin().await?;
        let config_id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO sync_configs (
                id, name, description, master_datasource_id, slave_datasource_id,
                master_view_id, slave_view_id, master_table, slave_table,
                master_pk_column, slave_pk_column, conflict_strategy, webhook_url,
                sync_deletes, batch_size, cron_schedule
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(&config_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.master_datasource_id)
        .bind(&input.slave_datasource_id)
        .bind(&input.master_view_id)
        .bind(&input.slave_view_id)
        .bind(&input.master_table)
        .bind(&input.slave_table)
        .bind(&input.master_pk_column)
        .bind(&input.slave_pk_column)
        .bind(&input.conflict_strategy)
        .bind(&input.webhook_url)
        .bind(input.sync_deletes)
        .bind(input.batch_size)
        .bind(&input.cron_schedule)
        .execute(&mut *tx)
        .await
        .context("failed to insert sync config")?;

        for mapping in &input.field_mappings {
            sqlx::query(
                r#"
                INSERT INTO field_mappings (
                    id, sync_config_id, master_column, slave_column,
                    transform, is_key_field, skip_sync
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&config_id)
            .bind(&mapping.master_column)
            .bind(&mapping.slave_column)
            .bind(&mapping.transform)
            .bind(mapping.is_key_field)
            .bind(mapping.skip_sync)
            .execute(&mut *tx)
            .await
            .context("failed to insert field mapping")?;
        }

        tx.commit().await?;
        self.get_sync_config(&config_id)
            .await?
            .context("sync config vanished after insert")
    }

    #[instrument(skip(self))]
    pub async fn get_sync_config(&self, config_id: &str) -> Result<Option<SyncConfig>> {
        let row = sqlx::query_as::<_, SyncConfigRow>(&format!(
            "SELECT {SYNC_CONFIG_COLUMNS} FROM sync_configs WHERE id = $1"
        ))
        .bind(config_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch sync config")?;

        let Some(row) = row else { return Ok(None) };

        let mappings = sqlx::query_as::<_, FieldMappingRow>(
            r#"
            SELECT id, sync_config_id, master_column, slave_column,
                   transform, is_key_field, skip_sync
            FROM field_mappings
            WHERE sync_config_id = $1
            "#,
        )
        .bind(config_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch field mappings")?;

        Some(row.into_domain(mappings.into_iter().map(Into::into).collect())).transpose()
    }

    #[instrument(skip(self))]
    pub async fn list_sync_configs(&self) -> Result<Vec<SyncConfig>> {
        let rows = sqlx::query_as::<_, SyncConfigRow>(&format!(
            "SELECT {SYNC_CONFIG_COLUMNS} FROM sync_configs ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("failed to list sync configs")?;

        let mut configs = Vec::with_capacity(rows.len());
        for row in rows {
            let mappings = sqlx::query_as::<_, FieldMappingRow>(
                "SELECT id, sync_config_id, master_column, slave_column, transform, is_key_field, skip_sync \
                 FROM field_mappings WHERE sync_config_id = $1",
            )
            .bind(&row.id)
            .fetch_all(&self.pool)
            .await
            .context("failed to fetch field mappings")?;
            configs.push(row.into_domain(mappings.into_iter().map(Into::into).collect())?);
        }
        Ok(configs)
    }

    #[instrument(skip(self))]
    pub async fn delete_sync_config(&self, config_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_configs WHERE id = $1")
            .bind(config_id)
            .execute(&self.pool)
            .await
            .context("failed to delete sync config")?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    pub async fn touch_sync_config(&self, config_id: &str) -> Result<()> {
        sqlx::query("UPDATE sync_configs SET last_sync_at = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(config_id)
            .execute(&self.pool)
            .await
            .context("failed to stamp sync config")?;
        Ok(())
    }

    // --- jobs ---

    #[instrument(skip(self))]
    pub async fn create_sync_job(&self, config_id: &str, triggered_by: &str) -> Result<SyncJob> {
        let row = sqlx::query_as::<_, SyncJobRow>(&format!(
            r#"
            INSERT INTO sync_jobs (id, sync_config_id, status, triggered_by)
            VALUES ($1, $2, 'pending', $3)
            RETURNING {SYNC_JOB_COLUMNS}
            "#
        ))
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(config_id)
        .bind(triggered_by)
        .fetch_one(&self.pool)
        .await
        .context("failed to create sync job")?;

        row.into_domain()
    }

    #[instrument(skip(self))]
    pub async fn get_sync_job(&self, job_id: &str) -> Result<Option<SyncJob>> {
        let row = sqlx::query_as::<_, SyncJobRow>(&format!(
            "SELECT {SYNC_JOB_COLUMNS} FROM sync_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch sync job")?;

        row.map(SyncJobRow::into_domain).transpose()
    }

    #[instrument(skip(self))]
    pub async fn list_sync_jobs(
        &self,
        config_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SyncJob>> {
        let rows = sqlx::query_as::<_, SyncJobRow>(&format!(
            r#"
            SELECT {SYNC_JOB_COLUMNS} FROM sync_jobs
            WHERE ($1::TEXT IS NULL OR sync_config_id = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(config_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to list sync jobs")?;

        rows.into_iter().map(SyncJobRow::into_domain).collect()
    }

    #[instrument(skip(self))]
    pub async fn mark_job_running(&self, job_id: &str) -> Result<()> {
        sqlx::query("UPDATE sync_jobs SET status = 'running', started_at = NOW() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .context("failed to mark job running")?;
        Ok(())
    }

    /// Persist the job's current counters. Terminal statuses also stamp
    /// `completed_at`; a terminal row is never rewritten.
    #[instrument(skip(self, job))]
    pub async fn save_job_progress(&self, job: &SyncJob) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = $2,
                total_records = $3,
                processed_records = $4,
                inserted_records = $5,
                updated_records = $6,
                deleted_records = $7,
                conflict_count = $8,
                error_count = $9,
                error_message = $10,
                completed_at = CASE WHEN $11 THEN NOW() ELSE completed_at END
            WHERE id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(&job.id)
        .bind(job.status.as_str())
        .bind(job.total_records)
        .bind(job.processed_records)
        .bind(job.inserted_records)
        .bind(job.updated_records)
        .bind(job.deleted_records)
        .bind(job.conflict_count)
        .bind(job.error_count)
        .bind(&job.error_message)
        .bind(job.status.is_terminal())
        .execute(&self.pool)
        .await
        .context("failed to save job progress")?;
        Ok(())
    }

    // --- conflicts ---

    #[instrument(skip(self, master_data, slave_data))]
    pub async fn insert_conflict(
        &self,
        sync_config_id: &str,
        job_id: &str,
        record_key: &str,
        master_data: &Value,
        slave_data: &Value,
        conflicting_fields: &[String],
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO conflicts (
                id, sync_config_id, job_id, record_key,
                master_data, slave_data, conflicting_fields, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
            "#,
        )
        .bind(&id)
        .bind(sync_config_id)
        .bind(job_id)
        .bind(record_key)
        .bind(master_data)
        .bind(slave_data)
        .bind(serde_json::to_value(conflicting_fields)?)
        .execute(&self.pool)
        .await
        .context("failed to insert conflict")?;
        Ok(id)
    }

    #[instrument(skip(self))]
    pub async fn list_conflicts(
        &self,
        sync_config_id: &str,
        status_filter: &str,
    ) -> Result<Vec<ConflictRow>> {
        let rows = sqlx::query_as::<_, ConflictRowDb>(&format!(
            r#"
            SELECT {CONFLICT_COLUMNS} FROM conflicts
            WHERE sync_config_id = $1
              AND ($2 != 'pending' OR status = 'pending')
              AND ($2 != 'resolved' OR status != 'pending')
            ORDER BY created_at DESC
            "#
        ))
        .bind(sync_config_id)
        .bind(status_filter)
        .fetch_all(&self.pool)
        .await
        .context("failed to list conflicts")?;

        rows.into_iter().map(ConflictRowDb::into_domain).collect()
    }

    #[instrument(skip(self))]
    pub async fn get_conflict(
        &self,
        sync_config_id: &str,
        conflict_id: &str,
    ) -> Result<Option<ConflictRow>> {
        let row = sqlx::query_as::<_, ConflictRowDb>(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE id = $1 AND sync_config_id = $2"
        ))
        .bind(conflict_id)
        .bind(sync_config_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch conflict")?;

        row.map(ConflictRowDb::into_domain).transpose()
    }

    /// Transition a pending conflict to a terminal status, exactly once.
    #[instrument(skip(self, resolved_data))]
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        status: ConflictResolutionStatus,
        resolved_data: Option<&Value>,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<Option<ConflictRow>> {
        let row = sqlx::query_as::<_, ConflictRowDb>(&format!(
            r#"
            UPDATE conflicts
            SET status = $2,
                resolved_data = $3,
                resolved_by = $4,
                resolved_at = NOW(),
                resolution_notes = $5
            WHERE id = $1 AND status = 'pending'
            RETURNING {CONFLICT_COLUMNS}
            "#
        ))
        .bind(conflict_id)
        .bind(status.as_str())
        .bind(resolved_data)
        .bind(resolved_by)
        .bind(notes)
        .fetch_optional(&self.pool)
        .await
        .context("failed to resolve conflict")?;

        row.map(ConflictRowDb::into_domain).transpose()
    }
}
