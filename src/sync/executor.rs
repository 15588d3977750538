// Sync job orchestration: capture master pages into the KV buffer,
// then flush record by record into the slave.
//
// Per-record failures increment the error counter and continue; only
// orchestration failures fail the job.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{error, info, instrument, warn};

use crate::adapters::{create_adapter, DataAdapter, ReadQuery};
use crate::cache::CacheLayer;
use crate::errors::FrontbaseError;
use crate::filtering::FilterExpr;
use crate::repository::CoreStore;
use crate::types::{Datasource, JobStatus, Record, SyncConfig, SyncJob};

use super::conflict_resolver::{ConflictResolver, Resolution};
use super::field_mapper::FieldMapper;
use super::state_manager::StateManager;

/// Everything a background sync task needs; cheap to clone into spawns.
#[derive(Clone)]
pub struct SyncContext {
    pub store: CoreStore,
    pub cache: CacheLayer,
}

/// Entry point for a dispatched job. Never returns an error to the
/// spawner; all failure is recorded on the job row.
pub async fn execute_sync(ctx: SyncContext, job_id: String, config_id: String) {
    if let Err(e) = run(&ctx, &job_id, &config_id).await {
        error!("Sync execution failed for job {job_id}: {e:#}");
        if let Ok(Some(mut job)) = ctx.store.get_sync_job(&job_id).await {
            if !job.status.is_terminal() {
                job.status = JobStatus::Failed;
                job.error_message = Some(format!("{e:#}"));
                let _ = ctx.store.save_job_progress(&job).await;
            }
        }
    }
}

#[instrument(skip(ctx))]
async fn run(ctx: &SyncContext, job_id: &str, config_id: &str) -> Result<()> {
    let config = ctx
        .store
        .get_sync_config(config_id)
        .await?
        .context("sync config not found")?;
    let mut job = ctx
        .store
        .get_sync_job(job_id)
        .await?
        .context("sync job not found")?;

    let master_ds = ctx
        .store
        .get_datasource(&config.master_datasource_id)
        .await?
        .context("master datasource not found")?;
    let slave_ds = ctx
        .store
        .get_datasource(&config.slave_datasource_id)
        .await?
        .context("slave datasource not found")?;

    ctx.store.mark_job_running(job_id).await?;
    job.status = JobStatus::Running;

    // The KV buffer is mandatory; fail fast when it cannot answer.
    let mut state = StateManager::open(ctx.cache.clone(), job_id).await?;

    let master_filters = load_view_filters(ctx, config.master_view_id.as_deref()).await?;

    let mapper = FieldMapper::new(config.field_mappings.clone());
    let resolver = ConflictResolver::new(&config);

    let master_adapter = create_adapter(&master_ds, &ctx.cache).await?;
    let slave_adapter = create_adapter(&slave_ds, &ctx.cache).await?;

    let outcome = run_phases(
        ctx,
        &config,
        &mut job,
        &master_ds,
        master_adapter.as_ref(),
        slave_adapter.as_ref(),
        &mapper,
        &resolver,
        &mut state,
        &master_filters,
    )
    .await;

    let _ = master_adapter.close().await;
    let _ = slave_adapter.close().await;

    match outcome {
        Ok(()) => {
            job.status = JobStatus::Completed;
            ctx.store.save_job_progress(&job).await?;
            ctx.store.touch_sync_config(config_id).await?;
            state.cleanup().await;
            info!(
                "Sync job {job_id} completed: {} inserted, {} updated, {} conflicts, {} errors",
                job.inserted_records, job.updated_records, job.conflict_count, job.error_count
            );
            Ok(())
        }
        Err(e) => {
            job.status = JobStatus::Failed;
            job.error_message = Some(format!("{e:#}"));
            ctx.store.save_job_progress(&job).await?;
            Err(e)
        }
    }
}

async fn load_view_filters(
    ctx: &SyncContext,
    view_id: Option<&str>,
) -> Result<Vec<FilterExpr>> {
    let Some(view_id) = view_id else {
        return Ok(Vec::new());
    };
    let view = ctx
        .store
        .get_view(view_id)
        .await?
        .context("sync view not found")?;
    Ok(FilterExpr::parse_list(&view.filters))
}

#[allow(clippy::too_many_arguments)]
async fn run_phases(
    ctx: &SyncContext,
    config: &SyncConfig,
    job: &mut SyncJob,
    _master_ds: &Datasource,
    master: &dyn DataAdapter,
    slave: &dyn DataAdapter,
    mapper: &FieldMapper,
    resolver: &ConflictResolver,
    state: &mut StateManager,
    master_filters: &[FilterExpr],
) -> Result<()> {
    let master_pk = mapper
        .key_mapping()
        .map(|m| m.master_column.clone())
        .unwrap_or_else(|| config.master_pk_column.clone());
    let slave_pk = mapper
        .key_mapping()
        .map(|m| m.slave_column.clone())
        .unwrap_or_else(|| config.slave_pk_column.clone());

    job.total_records = master
        .count_records(&config.master_table, master_filters)
        .await
        .context("counting master records failed")?;
    ctx.store.save_job_progress(job).await?;

    // Phase 1: capture master pages into the buffer.
    let batch_size = i64::from(config.batch_size.max(1));
    let mut offset = 0i64;
    loop {
        let mut query = ReadQuery::with_limit(batch_size);
        query.offset = offset;
        query.filters = master_filters.to_vec();
        query.columns = {
            let cols = mapper.master_columns();
            if cols.is_empty() {
                None
            } else {
                Some(cols)
            }
        };
        let records = master
            .read_records(&config.master_table, &query)
            .await
            .context("reading master page failed")?;
        if records.is_empty() {
            break;
        }

        for record in &records {
            let record_id = record
                .get(&master_pk)
                .map(value_key_string)
                .unwrap_or_default();
            if record_id.is_empty() {
                job.error_count += 1;
                warn!("master record without key column {master_pk}; skipping");
                continue;
            }
            state.capture_record(&record_id, record).await?;
            job.processed_records += 1;
        }
        state.flush_captured_index().await;
        ctx.store.save_job_progress(job).await?;
        offset += batch_size;
    }

    // Phase 2: flush buffered records into the slave.
    let captured: Vec<String> = state.captured_ids().to_vec();
    for record_id in &captured {
        let Some(master_record) = state.get_record(record_id).await else {
            continue;
        };
        match sync_record(
            ctx, config, job, slave, mapper, resolver, &slave_pk, record_id, &master_record,
        )
        .await
        {
            Ok(status) => {
                let _ = state.mark_record(record_id, status).await;
            }
            Err(e) => {
                job.error_count += 1;
                error!("Error processing record {record_id}: {e:#}");
            }
        }
    }
    ctx.store.save_job_progress(job).await?;

    // Phase 3: mirror deletions when configured.
    if config.sync_deletes {
        sync_deletions(config, job, master, slave, &master_pk, &slave_pk).await?;
        ctx.store.save_job_progress(job).await?;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn sync_record(
    ctx: &SyncContext,
    config: &SyncConfig,
    job: &mut SyncJob,
    slave: &dyn DataAdapter,
    mapper: &FieldMapper,
    resolver: &ConflictResolver,
    slave_pk: &str,
    record_id: &str,
    master_record: &Record,
) -> Result<&'static str> {
    let key_value = Value::String(record_id.to_string());
    let existing = slave
        .read_record_by_key(&config.slave_table, slave_pk, &key_value)
        .await?;

    let Some(slave_record) = existing else {
        // Insert path.
        let mapped = mapper.master_to_slave(master_record, None);
        slave
            .upsert_record(&config.slave_table, &mapped, slave_pk)
            .await?;
        job.inserted_records += 1;
        return Ok("inserted");
    };

    let conflicting = mapper.find_conflicts(master_record, &slave_record);
    if conflicting.is_empty() {
        let mapped = mapper.master_to_slave(master_record, Some(&slave_record));
        slave
            .upsert_record(&config.slave_table, &mapped, slave_pk)
            .await?;
        job.updated_records += 1;
        return Ok("updated");
    }

    match resolver
        .resolve(record_id, master_record, &slave_record, &conflicting)
        .await
    {
        Ok(Resolution::Resolved(resolved)) => {
            let mapped = mapper.master_to_slave(&resolved, Some(&slave_record));
            slave
                .upsert_record(&config.slave_table, &mapped, slave_pk)
                .await?;
            job.updated_records += 1;
            Ok("resolved")
        }
        Ok(Resolution::KeepSlave) => {
            job.updated_records += 1;
            Ok("kept")
        }
        // The resolver raises for manual/escalated conflicts; persist
        // the row it carries and move on to the next record.
        Err(FrontbaseError::ConflictRequiresManualResolution {
            record_key,
            master_data,
            slave_data,
            conflicting_fields,
            escalation,
        }) => {
            if let Some(reason) = &escalation {
                warn!("Conflict on {record_key} escalated: {reason}");
            }
            ctx.store
                .insert_conflict(
                    &config.id,
                    &job.id,
                    &record_key,
                    &master_data,
                    &slave_data,
                    &conflicting_fields,
                )
                .await?;
            job.conflict_count += 1;
            Ok("conflict")
        }
        Err(other) => Err(other.into()),
    }
}

/// Delete slave records whose key no longer exists on the master.
async fn sync_deletions(
    config: &SyncConfig,
    job: &mut SyncJob,
    master: &dyn DataAdapter,
    slave: &dyn DataAdapter,
    master_pk: &str,
    slave_pk: &str,
) -> Result<()> {
    const KEY_SCAN_LIMIT: i64 = 100_000;

    let mut master_query = ReadQuery::with_limit(KEY_SCAN_LIMIT);
    master_query.columns = Some(vec![master_pk.to_string()]);
    let master_records = master
        .read_records(&config.master_table, &master_query)
        .await
        .context("enumerating master keys failed")?;
    let master_keys: HashSet<String> = master_records
        .iter()
        .filter_map(|r| r.get(master_pk).map(value_key_string))
        .collect();

    let mut slave_query = ReadQuery::with_limit(KEY_SCAN_LIMIT);
    slave_query.columns = Some(vec![slave_pk.to_string()]);
    let slave_records = slave
        .read_records(&config.slave_table, &slave_query)
        .await
        .context("enumerating slave keys failed")?;

    for record in &slave_records {
        let Some(key) = record.get(slave_pk) else { continue };
        if !master_keys.contains(&value_key_string(key)) {
            match slave
                .delete_record(&config.slave_table, slave_pk, key)
                .await
            {
                Ok(true) => job.deleted_records += 1,
                Ok(false) => {}
                Err(e) => {
                    job.error_count += 1;
                    warn!("Failed to delete slave record {key}: {e}");
                }
            }
        }
    }
    Ok(())
}

fn value_key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
