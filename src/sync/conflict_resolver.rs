// Conflict resolution strategies for records that differ between
// master and slave.
//
// Strategies that cannot settle a record automatically raise
// `ConflictRequiresManualResolution`; the executor catches it, writes a
// conflict row, and continues with the next record.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{instrument, warn};

use crate::errors::FrontbaseError;
use crate::types::{ConflictStrategy, Record, SyncConfig};

/// Outcome of resolving one conflicting record automatically.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Write this record to the slave.
    Resolved(Record),
    /// Keep the slave untouched.
    KeepSlave,
}

pub struct ConflictResolver {
    strategy: ConflictStrategy,
    webhook_url: Option<String>,
    config_id: String,
    config_name: String,
    http: reqwest::Client,
}

impl ConflictResolver {
    pub fn new(config: &SyncConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            strategy: config.conflict_strategy,
            webhook_url: config.webhook_url.clone(),
            config_id: config.id.clone(),
            config_name: config.name.clone(),
            http,
        }
    }

    /// Settle one conflicting record.
    ///
    /// Returns `Err(ConflictRequiresManualResolution)` when the
    /// strategy is manual, or when a webhook strategy fails and
    /// escalates; the payload carries everything the executor needs to
    /// persist the conflict row.
    #[instrument(skip(self, master, slave, conflicting_fields))]
    pub async fn resolve(
        &self,
        record_key: &str,
        master: &Record,
        slave: &Record,
        conflicting_fields: &[String],
    ) -> Result<Resolution, FrontbaseError> {
        match self.strategy {
            ConflictStrategy::SourceWins => Ok(Resolution::Resolved(master.clone())),
            ConflictStrategy::TargetWins => Ok(Resolution::KeepSlave),
            ConflictStrategy::Merge => {
                // Slave as the base, master winning each conflicting field.
                let mut merged = slave.clone();
                for (key, value) in master {
                    merged.insert(key.clone(), value.clone());
                }
                Ok(Resolution::Resolved(merged))
            }
            ConflictStrategy::Webhook => match &self.webhook_url {
                Some(url) => {
                    self.resolve_via_webhook(url, record_key, master, slave, conflicting_fields)
                        .await
                }
                None => Err(manual_resolution(
                    record_key,
                    master,
                    slave,
                    conflicting_fields,
                    None,
                )),
            },
            ConflictStrategy::Manual => Err(manual_resolution(
                record_key,
                master,
                slave,
                conflicting_fields,
                None,
            )),
        }
    }

    /// POST the conflict to the configured URL and expect
    /// `{"resolved_data": {...}}`. Anything else escalates to manual.
    async fn resolve_via_webhook(
        &self,
        url: &str,
        record_key: &str,
        master: &Record,
        slave: &Record,
        conflicting_fields: &[String],
    ) -> Result<Resolution, FrontbaseError> {
        let payload = json!({
            "record_key": record_key,
            "master_data": master,
            "slave_data": slave,
            "conflicting_fields": conflicting_fields,
            "config_id": self.config_id,
            "config_name": self.config_name,
        });

        let outcome: Result<Record> = async {
            let response = self
                .http
                .post(url)
                .json(&payload)
                .send()
                .await
                .context("conflict webhook unreachable")?;
            let status = response.status();
            if !status.is_success() {
                anyhow::bail!("conflict webhook returned {status}");
            }
            let body: Value = response
                .json()
                .await
                .context("conflict webhook returned non-JSON")?;
            body.get("resolved_data")
                .and_then(Value::as_object)
                .cloned()
                .context("conflict webhook response missing resolved_data")
        }
        .await;

        match outcome {
            Ok(resolved) => Ok(Resolution::Resolved(resolved)),
            Err(e) => {
                warn!("Webhook resolution failed for {record_key}: {e}");
                Err(manual_resolution(
                    record_key,
                    master,
                    slave,
                    conflicting_fields,
                    Some(format!("webhook failed: {e}")),
                ))
            }
        }
    }
}

fn manual_resolution(
    record_key: &str,
    master: &Record,
    slave: &Record,
    conflicting_fields: &[String],
    escalation: Option<String>,
) -> FrontbaseError {
    FrontbaseError::ConflictRequiresManualResolution {
        record_key: record_key.to_string(),
        master_data: Value::Object(master.clone()),
        slave_data: Value::Object(slave.clone()),
        conflicting_fields: conflicting_fields.to_vec(),
        escalation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config(strategy: ConflictStrategy) -> SyncConfig {
        SyncConfig {
            id: "cfg1".into(),
            name: "test".into(),
            description: None,
            master_datasource_id: "m".into(),
            slave_datasource_id: "s".into(),
            master_view_id: None,
            slave_view_id: None,
            master_table: "a".into(),
            slave_table: "b".into(),
            master_pk_column: "id".into(),
            slave_pk_column: "id".into(),
            conflict_strategy: strategy,
            webhook_url: None,
            active: true,
            sync_deletes: false,
            batch_size: 100,
            cron_schedule: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_sync_at: None,
            field_mappings: vec![],
        }
    }

    fn record(v: serde_json::Value) -> Record {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn source_wins_takes_master() {
        let resolver = ConflictResolver::new(&config(ConflictStrategy::SourceWins));
        let master = record(json!({"id": 42, "title": "New"}));
        let slave = record(json!({"id": 42, "title": "Old"}));
        let out = resolver
            .resolve("42", &master, &slave, &["title".into()])
            .await
            .unwrap();
        assert_eq!(out, Resolution::Resolved(master));
    }

    #[tokio::test]
    async fn target_wins_keeps_slave() {
        let resolver = ConflictResolver::new(&config(ConflictStrategy::TargetWins));
        let master = record(json!({"id": 42, "title": "New"}));
        let slave = record(json!({"id": 42, "title": "Old"}));
        let out = resolver
            .resolve("42", &master, &slave, &["title".into()])
            .await
            .unwrap();
        assert_eq!(out, Resolution::KeepSlave);
    }

    #[tokio::test]
    async fn merge_prefers_master_on_collisions() {
        let resolver = ConflictResolver::new(&config(ConflictStrategy::Merge));
        let master = record(json!({"id": 42, "title": "New"}));
        let slave = record(json!({"id": 42, "title": "Old", "extra": "kept"}));
        let out = resolver
            .resolve("42", &master, &slave, &["title".into()])
            .await
            .unwrap();
        assert_eq!(
            out,
            Resolution::Resolved(record(json!({"id": 42, "title": "New", "extra": "kept"})))
        );
    }

    #[tokio::test]
    async fn manual_strategy_raises_with_full_payload() {
        let resolver = ConflictResolver::new(&config(ConflictStrategy::Manual));
        let master = record(json!({"id": 42, "title": "New"}));
        let slave = record(json!({"id": 42, "title": "Old"}));
        let err = resolver
            .resolve("42", &master, &slave, &["title".into()])
            .await
            .unwrap_err();
        match err {
            FrontbaseError::ConflictRequiresManualResolution {
                record_key,
                master_data,
                slave_data,
                conflicting_fields,
                escalation,
            } => {
                assert_eq!(record_key, "42");
                assert_eq!(master_data, json!({"id": 42, "title": "New"}));
                assert_eq!(slave_data, json!({"id": 42, "title": "Old"}));
                assert_eq!(conflicting_fields, vec!["title".to_string()]);
                assert!(escalation.is_none());
            }
            other => panic!("expected manual-resolution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn webhook_without_url_escalates_to_manual() {
        let resolver = ConflictResolver::new(&config(ConflictStrategy::Webhook));
        let master = record(json!({"id": 42}));
        let slave = record(json!({"id": 42}));
        let err = resolver.resolve("42", &master, &slave, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            FrontbaseError::ConflictRequiresManualResolution { escalation: None, .. }
        ));
    }
}
