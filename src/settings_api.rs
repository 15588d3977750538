// Project settings handlers: cache backend configuration and the
// connection test.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;

use crate::http_server::AppState;
use crate::http_types::{ok, ApiResult};
use crate::types::ProjectSettings;

#[derive(Debug, Deserialize)]
pub struct RedisSettingsUpdate {
    pub redis_url: Option<String>,
    pub redis_token: Option<String>,
    #[serde(default = "default_redis_type")]
    pub redis_type: String,
    #[serde(default)]
    pub redis_enabled: bool,
    #[serde(default = "default_ttl_data")]
    pub cache_ttl_data: i64,
    #[serde(default = "default_ttl_count")]
    pub cache_ttl_count: i64,
}

fn default_redis_type() -> String {
    "upstash".to_string()
}

fn default_ttl_data() -> i64 {
    60
}

fn default_ttl_count() -> i64 {
    300
}

fn redis_view(settings: &ProjectSettings) -> serde_json::Value {
    json!({
        "redis_url": settings.redis_url,
        "redis_token": settings.redis_token,
        "redis_type": settings.redis_type,
        "redis_enabled": settings.redis_enabled,
        "cache_ttl_data": settings.cache_ttl_data,
        "cache_ttl_count": settings.cache_ttl_count,
    })
}

pub async fn get_redis_settings(State(state): State<AppState>) -> ApiResult {
    let settings = state
        .store
        .load_project_settings()
        .await?
        .unwrap_or_default();
    Ok(ok(redis_view(&settings)))
}

pub async fn update_redis_settings(
    State(state): State<AppState>,
    Json(update): Json<RedisSettingsUpdate>,
) -> ApiResult {
    // Branding fields ride along unchanged; this endpoint owns only the
    // cache backend knobs.
    let mut settings = state
        .store
        .load_project_settings()
        .await?
        .unwrap_or_default();
    settings.redis_url = update.redis_url;
    settings.redis_token = update.redis_token;
    settings.redis_type = update.redis_type;
    settings.redis_enabled = update.redis_enabled;
    settings.cache_ttl_data = update.cache_ttl_data;
    settings.cache_ttl_count = update.cache_ttl_count;

    let saved = state.store.save_project_settings(&settings).await?;
    // Writers invalidate the process-local copy.
    state.settings.replace(saved.clone());
    Ok(ok(redis_view(&saved)))
}

pub async fn test_redis(
    State(state): State<AppState>,
    Json(update): Json<RedisSettingsUpdate>,
) -> ApiResult {
    let (success, message) = state
        .cache
        .test_backend(
            update.redis_url.as_deref().unwrap_or(""),
            update.redis_token.as_deref(),
            &update.redis_type,
        )
        .await;
    Ok((
        StatusCode::OK,
        Json(json!({"success": success, "message": message})),
    ))
}
