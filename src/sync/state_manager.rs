// In-flight sync state in the external KV: records captured from the
// master are buffered under a per-job namespace with a TTL, then
// flushed to the slave.
//
// The buffer is load-bearing for crash recovery, so an unavailable KV
// fails the job at startup instead of silently degrading.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tracing::instrument;

use crate::cache::CacheLayer;
use crate::types::Record;

/// Captured state lives this long; a stalled job's leftovers expire.
const DEFAULT_STATE_TTL_SECS: u64 = 4 * 60 * 60;

pub struct StateManager {
    cache: CacheLayer,
    job_id: String,
    ttl_secs: u64,
    captured_ids: Vec<String>,
}

impl StateManager {
    /// Verify the configured KV answers before accepting any state.
    #[instrument(skip(cache))]
    pub async fn open(cache: CacheLayer, job_id: &str) -> Result<Self> {
        let settings = cache_settings(&cache)?;
        let (ok, message) = cache
            .test_backend(
                settings.0.as_str(),
                settings.1.as_deref(),
                settings.2.as_str(),
            )
            .await;
        if !ok {
            bail!("sync state backend unavailable: {message}");
        }
        Ok(Self {
            cache,
            job_id: job_id.to_string(),
            ttl_secs: DEFAULT_STATE_TTL_SECS,
            captured_ids: Vec::new(),
        })
    }

    fn record_key(&self, record_id: &str) -> String {
        format!("sync:job:{}:record:{record_id}", self.job_id)
    }

    fn captured_index_key(&self) -> String {
        format!("sync:job:{}:captured", self.job_id)
    }

    /// Buffer one captured master record.
    pub async fn capture_record(&mut self, record_id: &str, data: &Record) -> Result<()> {
        let state = json!({
            "id": record_id,
            "data": data,
            "status": "captured",
        });
        self.cache
            .set(&self.record_key(record_id), state, self.ttl_secs)
            .await;
        self.captured_ids.push(record_id.to_string());
        Ok(())
    }

    /// Persist the captured-id index; called once per capture batch so
    /// a restarted worker can find the buffered records.
    pub async fn flush_captured_index(&self) {
        self.cache
            .set(
                &self.captured_index_key(),
                Value::from(self.captured_ids.clone()),
                self.ttl_secs,
            )
            .await;
    }

    pub fn captured_ids(&self) -> &[String] {
        &self.captured_ids
    }

    pub async fn get_record(&self, record_id: &str) -> Option<Record> {
        let state = self.cache.get(&self.record_key(record_id)).await?;
        state.get("data").and_then(Value::as_object).cloned()
    }

    pub async fn mark_record(&self, record_id: &str, status: &str) -> Result<()> {
        let key = self.record_key(record_id);
        let Some(mut state) = self.cache.get(&key).await else {
            return Ok(());
        };
        if let Some(obj) = state.as_object_mut() {
            obj.insert("status".to_string(), Value::String(status.to_string()));
        }
        self.cache.set(&key, state, self.ttl_secs).await;
        Ok(())
    }

    /// Drop the job's buffered state; TTL handles it otherwise.
    pub async fn cleanup(&self) {
        self.cache
            .purge_prefix(&format!("sync:job:{}:", self.job_id))
            .await;
    }
}

fn cache_settings(cache: &CacheLayer) -> Result<(String, Option<String>, String)> {
    let settings = cache.project_settings();
    if !settings.redis_enabled {
        bail!("sync requires the external cache backend to be enabled");
    }
    let url = settings
        .redis_url
        .clone()
        .context("sync requires a configured cache backend URL")?;
    Ok((url, settings.redis_token.clone(), settings.redis_type.clone()))
}
