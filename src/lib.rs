// Frontbase Core - page-builder backend
// Root library module

pub mod adapters;
pub mod cache;
pub mod datasource_api;
pub mod errors;
pub mod expression;
pub mod filtering;
pub mod http_server;
pub mod http_types;
pub mod observability;
pub mod pages_api;
pub mod publish;
pub mod repository;
pub mod schema_cache;
pub mod secrets;
pub mod settings;
pub mod settings_api;
pub mod sync;
pub mod sync_api;
pub mod types;
pub mod view_api;
pub mod view_service;

// Re-export key types
pub use observability::{init_logging, init_logging_with_level, with_trace_id};

pub use errors::{classify_connection_error, ConnectionKind, FrontbaseError};

pub use types::{
    ColumnDef, CompiledDatasource, DataRequest, Datasource, DatasourceKind, DatasourceView,
    FieldMapping, FkDef, JobStatus, ProjectSettings, Record, RelationshipRow, SyncConfig, SyncJob,
    TableSchema,
};

pub use filtering::{FilterExpr, FilterOperator, SqlDialect, WhereClause};

pub use adapters::{create_adapter, DataAdapter, RelatedSpec};

pub use cache::CacheLayer;
pub use repository::{create_core_store, CoreStore};
pub use schema_cache::SchemaCache;
pub use secrets::SecretBox;
pub use settings::SettingsHolder;

pub use publish::compiler::compile_page;
pub use publish::strategy::{create_publish_strategy, PublishStrategy};

// Re-export HTTP server construction
pub use http_server::{create_server, start_server, AppState};
