// HTTP server assembly: application state, the full route table, and
// the serve loop.

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::response::Json;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use axum::ServiceExt;
use serde_json::json;
use std::time::Instant;
use tokio::net::TcpListener;
use tower::{Layer, ServiceBuilder};
use tower_http::cors::{Any, CorsLayer};
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cache::CacheLayer;
use crate::publish::compiler::PublishContext;
use crate::repository::CoreStore;
use crate::schema_cache::SchemaCache;
use crate::settings::SettingsHolder;
use crate::view_service::ViewService;
use crate::{datasource_api, pages_api, settings_api, sync_api, view_api};

// Request bodies carry whole component trees; keep room for them.
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

static SERVER_START_TIME: once_cell::sync::Lazy<Instant> =
    once_cell::sync::Lazy::new(Instant::now);

/// Application state shared across handlers. Everything inside is an
/// Arc'd handle; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub store: CoreStore,
    pub cache: CacheLayer,
    pub settings: SettingsHolder,
}

impl AppState {
    pub fn new(store: CoreStore, cache: CacheLayer, settings: SettingsHolder) -> Self {
        Self {
            store,
            cache,
            settings,
        }
    }

    pub fn schema_cache(&self) -> SchemaCache {
        SchemaCache::new(self.store.clone(), self.cache.clone())
    }

    pub fn views(&self) -> ViewService {
        ViewService::new(self.store.clone(), self.cache.clone())
    }

    pub fn publish_ctx(&self) -> PublishContext {
        PublishContext {
            store: self.store.clone(),
            cache: self.cache.clone(),
            settings: self.settings.clone(),
        }
    }
}

async fn health_check(State(_state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": SERVER_START_TIME.elapsed().as_secs(),
    }))
}

/// Build the full router. Trailing-slash tolerance is applied by
/// `start_server`, which wraps this router in a path normalizer.
pub fn create_server(state: AppState) -> Router {
    let datasources = Router::new()
        .route("/", post(datasource_api::create_datasource))
        .route("/", get(datasource_api::list_datasources))
        .route("/test-raw", post(datasource_api::test_raw_datasource))
        .route("/search-all", get(datasource_api::search_all_datasources))
        .route("/:id", get(datasource_api::get_datasource))
        .route("/:id", put(datasource_api::update_datasource))
        .route("/:id", delete(datasource_api::delete_datasource))
        .route("/:id/test", post(datasource_api::test_datasource))
        .route("/:id/test-update", post(datasource_api::test_datasource_update))
        .route("/:id/tables", get(datasource_api::list_datasource_tables))
        .route("/:id/tables/:table/schema", get(datasource_api::get_table_schema))
        .route("/:id/tables/:table/data", get(datasource_api::get_table_data))
        .route("/:id/tables/:table/records", post(datasource_api::create_table_record))
        .route(
            "/:id/tables/:table/records/:record_id",
            patch(datasource_api::update_table_record),
        )
        .route(
            "/:id/tables/:table/distinct/:column",
            get(datasource_api::get_distinct_values),
        )
        .route("/:id/relationships", get(datasource_api::get_relationships))
        .route("/:id/search", get(datasource_api::search_datasource))
        .route("/:id/views", get(view_api::list_views))
        .route("/:id/views", post(view_api::create_view));

    let views = Router::new()
        .route("/:view_id", get(view_api::get_view))
        .route("/:view_id", patch(view_api::update_view))
        .route("/:view_id", delete(view_api::delete_view))
        .route("/:view_id/records", get(view_api::get_view_records))
        .route("/:view_id/records", post(view_api::create_view_record))
        .route("/:view_id/records", patch(view_api::patch_view_record))
        .route("/:view_id/count", get(view_api::get_view_count))
        .route("/:view_id/trigger", post(view_api::trigger_view));

    let configs = Router::new()
        .route("/", post(sync_api::create_sync_config))
        .route("/", get(sync_api::list_sync_configs))
        .route("/:config_id", get(sync_api::get_sync_config))
        .route("/:config_id", delete(sync_api::delete_sync_config));

    // One param name per position: the first segment is a config id for
    // dispatch/conflicts and a job id for status.
    let operations = Router::new()
        .route("/jobs", get(sync_api::list_jobs))
        .route("/:id", post(sync_api::execute_sync_job))
        .route("/:id/status", get(sync_api::get_job_status))
        .route("/:id/conflicts", get(sync_api::list_conflicts))
        .route(
            "/:id/resolve/:conflict_id",
            post(sync_api::resolve_conflict),
        );

    let webhooks = Router::new()
        .route("/n8n/:config_id", post(sync_api::n8n_webhook))
        .route("/zapier/:config_id", post(sync_api::zapier_webhook))
        .route(
            "/activepieces/:config_id",
            post(sync_api::activepieces_webhook),
        )
        .route("/generic/:config_id", post(sync_api::generic_webhook));

    let settings = Router::new()
        .route("/redis", get(settings_api::get_redis_settings))
        .route("/redis", put(settings_api::update_redis_settings))
        .route("/redis/test", post(settings_api::test_redis));

    let pages = Router::new()
        .route("/:page_id/publish", post(pages_api::publish_page))
        .route("/public/:slug", get(pages_api::get_public_page))
        .route("/homepage", get(pages_api::get_homepage));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/sync/datasources", datasources)
        .nest("/api/sync/views", views)
        .nest("/api/sync/configs", configs)
        .nest("/api/sync/operations", operations)
        .nest("/api/sync/webhooks", webhooks)
        .nest("/api/sync/settings", settings)
        .nest("/api/pages", pages)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer()),
        )
}

fn cors_layer() -> CorsLayer {
    match std::env::var("CORS_ORIGINS") {
        Ok(origins) if !origins.trim().is_empty() && origins.trim() != "*" => {
            let parsed: Vec<axum::http::HeaderValue> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        _ => CorsLayer::permissive(),
    }
}

/// Serve the API, accepting trailing slashes as equivalent paths.
pub async fn start_server(state: AppState, port: u16) -> Result<()> {
    let app = create_server(state);
    let app = NormalizePathLayer::trim_trailing_slash().layer(app);
    let listener = TcpListener::bind(&format!("0.0.0.0:{port}")).await?;

    info!("Frontbase core starting on port {port}");
    info!("Datasource API:  /api/sync/datasources");
    info!("Views API:       /api/sync/views");
    info!("Sync API:        /api/sync/operations");
    info!("Settings API:    /api/sync/settings");
    info!("Publish trigger: /api/pages/:page_id/publish");

    axum::serve(
        listener,
        ServiceExt::<Request>::into_make_service(app),
    )
    .await?;
    Ok(())
}
