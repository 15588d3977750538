// Pluggable delivery of compiled bundles. Strategies receive a
// serialized payload and run strictly after the page's database session
// is released.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::errors::FrontbaseError;

const EDGE_TIMEOUT: Duration = Duration::from_secs(30);
const SETTINGS_TIMEOUT: Duration = Duration::from_secs(5);
const SQL_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a delivery. `raw` keeps the strategy's full response for
/// the caller's envelope.
#[derive(Debug, Clone)]
pub struct PublishResult {
    pub preview_url: Option<String>,
    pub version: Option<i64>,
    pub raw: Value,
}

#[async_trait]
pub trait PublishStrategy: Send + Sync {
    async fn publish_page(&self, payload: &Value, force: bool)
        -> Result<PublishResult, FrontbaseError>;

    async fn unpublish_page(&self, slug: &str) -> Result<(), FrontbaseError>;

    /// Push branding settings to the delivery target. Best-effort;
    /// failures never fail a publish.
    async fn sync_settings(&self, settings: &Value);
}

/// Select the strategy from PUBLISH_STRATEGY (local | turso).
pub fn create_publish_strategy() -> Result<Box<dyn PublishStrategy>, FrontbaseError> {
    match std::env::var("PUBLISH_STRATEGY").as_deref() {
        Ok("turso") => Ok(Box::new(TursoPublishStrategy::from_env()?)),
        _ => Ok(Box::new(EdgeHttpStrategy::from_env())),
    }
}

/// POST the bundle to the edge service's /api/import.
pub struct EdgeHttpStrategy {
    http: reqwest::Client,
    edge_url: String,
}

impl EdgeHttpStrategy {
    pub fn from_env() -> Self {
        let edge_url = std::env::var("EDGE_URL")
            .or_else(|_| std::env::var("EDGE_ENGINE_URL"))
            .unwrap_or_else(|_| "http://localhost:3002".to_string());
        Self::new(edge_url)
    }

    pub fn new(edge_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(EDGE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            edge_url: edge_url.trim_end_matches('/').to_string(),
        }
    }

    fn classify(e: reqwest::Error) -> FrontbaseError {
        if e.is_timeout() {
            FrontbaseError::UpstreamTimeout(e.to_string())
        } else if e.is_connect() {
            FrontbaseError::UpstreamUnreachable(e.to_string())
        } else {
            FrontbaseError::UpstreamHttp {
                status: e.status().map(|s| s.as_u16()).unwrap_or(502),
                body: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl PublishStrategy for EdgeHttpStrategy {
    #[instrument(skip(self, payload))]
    async fn publish_page(
        &self,
        payload: &Value,
        force: bool,
    ) -> Result<PublishResult, FrontbaseError> {
        let import_url = format!("{}/api/import", self.edge_url);
        info!("Publishing to edge: {import_url}");

        let body = json!({"page": payload, "force": force});
        let response = self
            .http
            .post(&import_url)
            .json(&body)
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Edge import failed: status={status}, body={}", truncate(&body, 500));
            return Err(FrontbaseError::UpstreamHttp {
                status: status.as_u16(),
                body: truncate(&body, 500).to_string(),
            });
        }

        let raw: Value = response.json().await.unwrap_or(Value::Null);
        Ok(PublishResult {
            preview_url: raw
                .get("previewUrl")
                .and_then(Value::as_str)
                .map(String::from),
            version: raw.get("version").and_then(Value::as_i64),
            raw,
        })
    }

    #[instrument(skip(self))]
    async fn unpublish_page(&self, slug: &str) -> Result<(), FrontbaseError> {
        let url = format!("{}/api/import/{slug}", self.edge_url);
        let response = self
            .http
            .delete(&url)
            .timeout(SETTINGS_TIMEOUT)
            .send()
            .await
            .map_err(Self::classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FrontbaseError::UpstreamHttp {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn sync_settings(&self, settings: &Value) {
        let url = format!("{}/api/import/settings", self.edge_url);
        match self
            .http
            .post(&url)
            .timeout(SETTINGS_TIMEOUT)
            .json(settings)
            .send()
            .await
        {
            Ok(_) => info!("Synced project settings to edge"),
            Err(e) => warn!("Settings sync failed (non-fatal): {e}"),
        }
    }
}

/// Write compiled pages directly into a `published_pages` table on the
/// user's hosted SQL service; the edge reads the same database.
///
/// Required pre-shape on the target (this strategy does not manage it):
///
/// ```sql
/// CREATE TABLE published_pages (
///   id TEXT PRIMARY KEY, slug TEXT UNIQUE, name TEXT, title TEXT,
///   description TEXT, layout_data TEXT, seo_data TEXT, datasources TEXT,
///   css_bundle TEXT, version INTEGER, published_at TEXT,
///   is_public INTEGER, is_homepage INTEGER, created_at TEXT, updated_at TEXT
/// );
/// ```
pub struct TursoPublishStrategy {
    http: reqwest::Client,
    http_url: String,
    token: String,
    upstash_url: Option<String>,
    upstash_token: Option<String>,
}

impl TursoPublishStrategy {
    pub fn from_env() -> Result<Self, FrontbaseError> {
        let turso_url = std::env::var("TURSO_DB_URL").map_err(|_| {
            FrontbaseError::Validation(
                "TURSO_DB_URL is required when PUBLISH_STRATEGY=turso".to_string(),
            )
        })?;
        let token = std::env::var("TURSO_DB_TOKEN").unwrap_or_default();
        let upstash_url = std::env::var("UPSTASH_REDIS_URL").ok();
        let upstash_token = std::env::var("UPSTASH_REDIS_TOKEN").ok();

        let http_url = normalize_turso_url(&turso_url);
        info!("Turso publish strategy initialized -> {http_url}");

        let http = reqwest::Client::builder()
            .timeout(SQL_TIMEOUT)
            .build()
            .unwrap_or_default();
        Ok(Self {
            http,
            http_url,
            token,
            upstash_url,
            upstash_token,
        })
    }

    async fn execute_sql(&self, statements: Vec<Value>) -> Result<Value, FrontbaseError> {
        let url = format!("{}/v2/pipeline", self.http_url);
        let mut requests: Vec<Value> = statements
            .into_iter()
            .map(|stmt| json!({"type": "execute", "stmt": stmt}))
            .collect();
        requests.push(json!({"type": "close"}));

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({"requests": requests}))
            .send()
            .await
            .map_err(|e| FrontbaseError::UpstreamUnreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FrontbaseError::UpstreamHttp {
                status: status.as_u16(),
                body: truncate(&body, 300).to_string(),
            });
        }
        Ok(response.json().await.unwrap_or(Value::Null))
    }

    /// Best-effort edge cache invalidation; never fails the publish.
    async fn invalidate_cache(&self, slug: &str) {
        let (Some(url), Some(token)) = (&self.upstash_url, &self.upstash_token) else {
            return;
        };
        let key = format!("page:{slug}");
        match self
            .http
            .post(url.trim_end_matches('/'))
            .bearer_auth(token)
            .json(&json!(["DEL", key]))
            .send()
            .await
        {
            Ok(_) => info!("Cache invalidated: {key}"),
            Err(e) => warn!("Cache invalidation failed (non-fatal): {e}"),
        }
    }

    fn text_arg(value: impl Into<String>) -> Value {
        json!({"type": "text", "value": value.into()})
    }

    fn int_arg(value: i64) -> Value {
        json!({"type": "integer", "value": value.to_string()})
    }
}

#[async_trait]
impl PublishStrategy for TursoPublishStrategy {
    #[instrument(skip(self, payload))]
    async fn publish_page(
        &self,
        payload: &Value,
        _force: bool,
    ) -> Result<PublishResult, FrontbaseError> {
        let page = payload;
        let now = chrono::Utc::now().to_rfc3339();
        let version = page.get("version").and_then(Value::as_i64).unwrap_or(1);
        let slug = page
            .get("slug")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let stmt = json!({
            "sql": "INSERT OR REPLACE INTO published_pages \
                    (id, slug, name, title, description, layout_data, seo_data, \
                     datasources, css_bundle, version, published_at, is_public, \
                     is_homepage, created_at, updated_at) \
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            "args": [
                Self::text_arg(str_field(page, "id")),
                Self::text_arg(slug.clone()),
                Self::text_arg(str_field(page, "name")),
                Self::text_arg(str_field(page, "title")),
                Self::text_arg(str_field(page, "description")),
                Self::text_arg(page.get("layoutData").map(Value::to_string).unwrap_or_else(|| "{}".into())),
                Self::text_arg(page.get("seoData").filter(|v| !v.is_null()).map(Value::to_string).unwrap_or_default()),
                Self::text_arg(page.get("datasources").filter(|v| !v.is_null()).map(Value::to_string).unwrap_or_default()),
                Self::text_arg(str_field(page, "cssBundle")),
                Self::int_arg(version),
                Self::text_arg(page.get("publishedAt").and_then(Value::as_str).unwrap_or(&now)),
                Self::int_arg(i64::from(page.get("isPublic").and_then(Value::as_bool).unwrap_or(true))),
                Self::int_arg(i64::from(page.get("isHomepage").and_then(Value::as_bool).unwrap_or(false))),
                Self::text_arg(now.clone()),
                Self::text_arg(now.clone()),
            ]
        });

        self.execute_sql(vec![stmt]).await?;
        info!("Published page via Turso: {slug}");
        self.invalidate_cache(&slug).await;

        Ok(PublishResult {
            preview_url: Some(format!("/p/{slug}")),
            version: Some(version),
            raw: json!({"success": true}),
        })
    }

    #[instrument(skip(self))]
    async fn unpublish_page(&self, slug: &str) -> Result<(), FrontbaseError> {
        let stmt = json!({
            "sql": "DELETE FROM published_pages WHERE slug = ?",
            "args": [Self::text_arg(slug)]
        });
        self.execute_sql(vec![stmt]).await?;
        self.invalidate_cache(slug).await;
        Ok(())
    }

    async fn sync_settings(&self, settings: &Value) {
        let now = chrono::Utc::now().to_rfc3339();
        let stmt = json!({
            "sql": "INSERT OR REPLACE INTO project_settings \
                    (id, favicon_url, logo_url, site_name, site_description, app_url, updated_at) \
                    VALUES ('default', ?, ?, ?, ?, ?, ?)",
            "args": [
                Self::text_arg(str_field(settings, "faviconUrl")),
                Self::text_arg(str_field(settings, "logoUrl")),
                Self::text_arg(str_field(settings, "siteName")),
                Self::text_arg(str_field(settings, "siteDescription")),
                Self::text_arg(str_field(settings, "appUrl")),
                Self::text_arg(now),
            ]
        });
        if let Err(e) = self.execute_sql(vec![stmt]).await {
            warn!("Settings sync failed (non-fatal): {e}");
        }
    }
}

fn normalize_turso_url(url: &str) -> String {
    let replaced = url.replace("libsql://", "https://");
    if replaced.starts_with("https://") {
        replaced
    } else {
        format!("https://{replaced}")
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turso_urls_normalize_to_https() {
        assert_eq!(
            normalize_turso_url("libsql://db.turso.io"),
            "https://db.turso.io"
        );
        assert_eq!(
            normalize_turso_url("https://db.turso.io"),
            "https://db.turso.io"
        );
        assert_eq!(normalize_turso_url("db.turso.io"), "https://db.turso.io");
    }

    #[test]
    fn edge_strategy_trims_trailing_slash() {
        let strategy = EdgeHttpStrategy::new("http://edge:3002/".to_string());
        assert_eq!(strategy.edge_url, "http://edge:3002");
    }
}
