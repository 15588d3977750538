// Domain types shared across the adapter layer, schema cache, sync
// engine, and publish compiler.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A flat record as returned by every adapter. Related columns are keyed
/// `"<table>.<col>"`; base-table columns stay unprefixed.
pub type Record = serde_json::Map<String, Value>;

/// Supported datasource backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasourceKind {
    Postgres,
    Supabase,
    Mysql,
    WordpressDb,
    WordpressRest,
    WordpressGraphql,
    Neon,
}

impl DatasourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasourceKind::Postgres => "postgres",
            DatasourceKind::Supabase => "supabase",
            DatasourceKind::Mysql => "mysql",
            DatasourceKind::WordpressDb => "wordpress_db",
            DatasourceKind::WordpressRest => "wordpress_rest",
            DatasourceKind::WordpressGraphql => "wordpress_graphql",
            DatasourceKind::Neon => "neon",
        }
    }

    /// Whether this kind talks SQL directly (vs. an HTTP API).
    pub fn is_sql(&self) -> bool {
        matches!(
            self,
            DatasourceKind::Postgres
                | DatasourceKind::Supabase
                | DatasourceKind::Mysql
                | DatasourceKind::WordpressDb
                | DatasourceKind::Neon
        )
    }
}

impl Default for DatasourceKind {
    fn default() -> Self {
        DatasourceKind::Postgres
    }
}

impl FromStr for DatasourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "postgres" => Ok(DatasourceKind::Postgres),
            "supabase" => Ok(DatasourceKind::Supabase),
            "mysql" => Ok(DatasourceKind::Mysql),
            // Legacy spelling kept for rows written before the rename
            "wordpress" | "wordpress_db" => Ok(DatasourceKind::WordpressDb),
            "wordpress_rest" => Ok(DatasourceKind::WordpressRest),
            "wordpress_graphql" => Ok(DatasourceKind::WordpressGraphql),
            "neon" => Ok(DatasourceKind::Neon),
            other => bail!("unknown datasource kind: {other}"),
        }
    }
}

impl fmt::Display for DatasourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered datasource. Credentials are decrypted by the repository
/// on load; the `service_key` never leaves the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datasource {
    pub id: String,
    pub name: String,
    pub kind: DatasourceKind,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub database: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
    pub api_url: Option<String>,
    #[serde(skip_serializing, default)]
    pub service_key: Option<String>,
    pub anon_key: Option<String>,
    pub table_prefix: String,
    pub active: bool,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub last_test_success: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Datasource {
    /// Environment variable the edge resolves for this datasource's
    /// secret key. Secrets themselves never enter a bundle.
    pub fn secret_env_var(&self) -> String {
        format!(
            "DS_{}_API_KEY",
            self.name.to_uppercase().replace(' ', "_")
        )
    }

    /// URL the edge should hit for this datasource.
    pub fn public_url(&self) -> String {
        if let Some(url) = &self.api_url {
            url.clone()
        } else {
            format!(
                "postgresql://{}:{}/{}",
                self.host.as_deref().unwrap_or(""),
                self.port.unwrap_or(5432),
                self.database.as_deref().unwrap_or("")
            )
        }
    }
}

/// A single column as discovered from a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub is_foreign: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_column: Option<String>,
}

/// A foreign-key constraint in information-schema form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FkDef {
    pub constrained_columns: Vec<String>,
    pub referred_table: String,
    pub referred_columns: Vec<String>,
}

/// A table's discovered shape: columns plus foreign keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub foreign_keys: Vec<FkDef>,
}

/// A normalized FK edge, one row per (source column, referred column).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRow {
    pub source_table: String,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
}

/// A saved, named projection over an adapter table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceView {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub datasource_id: String,
    pub target_table: String,
    /// `[{"field": .., "operator": .., "value": ..}]`
    pub filters: Value,
    /// `{"target": "{{ m.expr }}"}`
    pub field_mappings: Value,
    /// `{"alias": {"view_id": .., "join_on": .., "target_key": ..}}`
    pub linked_views: Value,
    pub visible_columns: Vec<String>,
    pub pinned_columns: Vec<String>,
    pub column_order: Vec<String>,
    /// `[{"url": .., "event": ..}]`
    pub webhooks: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How the sync engine settles a record whose fields differ between
/// master and slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    SourceWins,
    TargetWins,
    Manual,
    Merge,
    Webhook,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::SourceWins => "source_wins",
            ConflictStrategy::TargetWins => "target_wins",
            ConflictStrategy::Manual => "manual",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::Webhook => "webhook",
        }
    }
}

impl FromStr for ConflictStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "source_wins" => Ok(ConflictStrategy::SourceWins),
            "target_wins" => Ok(ConflictStrategy::TargetWins),
            "manual" => Ok(ConflictStrategy::Manual),
            "merge" => Ok(ConflictStrategy::Merge),
            "webhook" => Ok(ConflictStrategy::Webhook),
            other => bail!("unknown conflict strategy: {other}"),
        }
    }
}

/// Column mapping between master and slave for one sync config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    pub id: String,
    pub sync_config_id: String,
    pub master_column: String,
    pub slave_column: String,
    pub transform: Option<String>,
    pub is_key_field: bool,
    pub skip_sync: bool,
}

/// Master-to-slave replication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub id: String,
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
    pub conflict_strategy: ConflictStrategy,
    pub webhook_url: Option<String>,
    pub active: bool,
    pub sync_deletes: bool,
    pub batch_size: i32,
    pub cron_schedule: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => bail!("unknown job status: {other}"),
        }
    }
}

/// One sync execution with its progress counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: String,
    pub sync_config_id: String,
    pub status: JobStatus,
    pub total_records: i64,
    pub processed_records: i64,
    pub inserted_records: i64,
    pub updated_records: i64,
    pub deleted_records: i64,
    pub conflict_count: i64,
    pub error_count: i64,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub triggered_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolutionStatus {
    Pending,
    ResolvedMaster,
    ResolvedSlave,
    ResolvedMerged,
    ResolvedWebhook,
    Skipped,
}

impl ConflictResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolutionStatus::Pending => "pending",
            ConflictResolutionStatus::ResolvedMaster => "resolved_master",
            ConflictResolutionStatus::ResolvedSlave => "resolved_slave",
            ConflictResolutionStatus::ResolvedMerged => "resolved_merged",
            ConflictResolutionStatus::ResolvedWebhook => "resolved_webhook",
            ConflictResolutionStatus::Skipped => "skipped",
        }
    }
}

impl FromStr for ConflictResolutionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ConflictResolutionStatus::Pending),
            "resolved_master" => Ok(ConflictResolutionStatus::ResolvedMaster),
            "resolved_slave" => Ok(ConflictResolutionStatus::ResolvedSlave),
            "resolved_merged" => Ok(ConflictResolutionStatus::ResolvedMerged),
            "resolved_webhook" => Ok(ConflictResolutionStatus::ResolvedWebhook),
            "skipped" => Ok(ConflictResolutionStatus::Skipped),
            other => bail!("unknown conflict status: {other}"),
        }
    }
}

/// A record-level conflict persisted for admin review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRow {
    pub id: String,
    pub sync_config_id: String,
    pub job_id: String,
    pub record_key: String,
    pub master_data: Value,
    pub slave_data: Value,
    pub conflicting_fields: Vec<String>,
    pub status: ConflictResolutionStatus,
    pub resolved_data: Option<Value>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Singleton per-process project settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub redis_url: Option<String>,
    pub redis_token: Option<String>,
    /// "upstash" | "self-hosted"
    pub redis_type: String,
    pub redis_enabled: bool,
    pub cache_ttl_data: i64,
    pub cache_ttl_count: i64,
    pub favicon_url: Option<String>,
    pub logo_url: Option<String>,
    pub site_name: Option<String>,
    pub site_description: Option<String>,
    pub app_url: Option<String>,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            redis_token: None,
            redis_type: "upstash".to_string(),
            redis_enabled: false,
            cache_ttl_data: 60,
            cache_ttl_count: 300,
            favicon_url: None,
            logo_url: None,
            site_name: None,
            site_description: None,
            app_url: None,
        }
    }
}

/// A stored page as read by the publish compiler. Authoring CRUD lives
/// outside the core; only these fields are consumed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub layout_data: Value,
    pub seo_data: Option<Value>,
    pub is_public: bool,
    pub is_homepage: bool,
    pub published_version: i64,
}

/// A fully formed HTTP request spec the edge executes verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequest {
    pub url: String,
    pub method: String,
    pub headers: serde_json::Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub result_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flatten_relations: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_config: Option<Value>,
}

/// Datasource fields a compiled bundle may carry. Secret keys are
/// replaced by the name of the environment variable that holds them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledDatasource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DatasourceKind,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anon_key: Option<String>,
    pub secret_env_var: String,
}

impl CompiledDatasource {
    pub fn from_datasource(ds: &Datasource) -> Self {
        Self {
            id: ds.id.clone(),
            kind: ds.kind,
            name: ds.name.clone(),
            url: ds.public_url(),
            anon_key: ds.anon_key.clone(),
            secret_env_var: ds.secret_env_var(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [
            DatasourceKind::Postgres,
            DatasourceKind::Supabase,
            DatasourceKind::Mysql,
            DatasourceKind::WordpressDb,
            DatasourceKind::WordpressRest,
            DatasourceKind::WordpressGraphql,
            DatasourceKind::Neon,
        ] {
            assert_eq!(kind.as_str().parse::<DatasourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn legacy_wordpress_spelling_still_parses() {
        assert_eq!(
            "wordpress".parse::<DatasourceKind>().unwrap(),
            DatasourceKind::WordpressDb
        );
    }

    #[test]
    fn secret_env_var_is_upper_snake() {
        let ds = Datasource {
            id: "d1".into(),
            name: "My Shop".into(),
            kind: DatasourceKind::Supabase,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            api_url: Some("https://x.supabase.co".into()),
            service_key: None,
            anon_key: None,
            table_prefix: "wp_".into(),
            active: true,
            last_tested_at: None,
            last_test_success: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(ds.secret_env_var(), "DS_MY_SHOP_API_KEY");
        assert_eq!(ds.public_url(), "https://x.supabase.co");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }
}
