// Two-tier cache: in-process L1 plus an optional external KV (Upstash
// REST or TCP Redis) selected by the persisted settings.
//
// Every operation fails open. A miss, a timeout, or a misconfigured
// backend reduces to "do the work uncached"; callers never see cache
// errors.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::settings::SettingsHolder;
use crate::types::ProjectSettings;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct L1Entry {
    value: Value,
    expires_at: Instant,
}

/// Hot-path cache for adapter reads, counts, icons, and CSS bundles.
#[derive(Clone)]
pub struct CacheLayer {
    l1: Arc<DashMap<String, L1Entry>>,
    http: reqwest::Client,
    settings: SettingsHolder,
}

impl CacheLayer {
    pub fn new(settings: SettingsHolder) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            l1: Arc::new(DashMap::new()),
            http,
            settings,
        }
    }

    /// Cache key for a read: `{prefix}:{table}:{md5(url:table:limit:offset:where:cols:order)}`.
    /// Keeping the table outside the digest lets mutations purge
    /// `{prefix}:{table}:*` without knowing every parameter combination.
    pub fn read_key(
        prefix: &str,
        datasource_url: &str,
        table: &str,
        limit: i64,
        offset: i64,
        where_json: &str,
        cols_json: &str,
        order: &str,
    ) -> String {
        let base =
            format!("{datasource_url}:{table}:{limit}:{offset}:{where_json}:{cols_json}:{order}");
        format!("{prefix}:{table}:{:x}", md5::compute(base.as_bytes()))
    }

    /// Current project settings snapshot (for callers that need to
    /// inspect the configured backend, e.g. the sync state manager).
    pub fn project_settings(&self) -> ProjectSettings {
        self.settings.current()
    }

    pub fn ttl_data(&self) -> u64 {
        self.settings.current().cache_ttl_data.max(0) as u64
    }

    pub fn ttl_count(&self) -> u64 {
        self.settings.current().cache_ttl_count.max(0) as u64
    }

    fn backend(&self) -> Option<ProjectSettings> {
        let settings = self.settings.current();
        if settings.redis_enabled && settings.redis_url.is_some() {
            Some(settings)
        } else {
            None
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(entry) = self.l1.get(key) {
            if entry.expires_at > Instant::now() {
                return Some(entry.value.clone());
            }
            drop(entry);
            self.l1.remove(key);
        }

        let settings = self.backend()?;
        let value = self.kv_get(&settings, key).await?;
        // Re-warm L1 with the shorter data TTL; L2 remains authoritative.
        self.l1.insert(
            key.to_string(),
            L1Entry {
                value: value.clone(),
                expires_at: Instant::now() + Duration::from_secs(self.ttl_data()),
            },
        );
        Some(value)
    }

    pub async fn set(&self, key: &str, value: Value, ttl_secs: u64) {
        self.l1.insert(
            key.to_string(),
            L1Entry {
                value: value.clone(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        if let Some(settings) = self.backend() {
            self.kv_set(&settings, key, &value, ttl_secs).await;
        }
    }

    /// Remove every key starting with `prefix` from both tiers.
    pub async fn purge_prefix(&self, prefix: &str) {
        self.l1.retain(|k, _| !k.starts_with(prefix));
        if let Some(settings) = self.backend() {
            self.kv_purge(&settings, prefix).await;
        }
    }

    // --- external KV plumbing ---

    fn is_rest(settings: &ProjectSettings) -> bool {
        let url = settings.redis_url.as_deref().unwrap_or("");
        settings.redis_type == "upstash" || url.starts_with("http://") || url.starts_with("https://")
    }

    async fn kv_get(&self, settings: &ProjectSettings, key: &str) -> Option<Value> {
        let result = if Self::is_rest(settings) {
            self.rest_command(settings, serde_json::json!(["GET", key]))
                .await
        } else {
            self.tcp_get(settings, key).await
        };
        match result {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("KV GET failed for {key}: {e}");
                None
            }
        }
    }

    async fn kv_set(&self, settings: &ProjectSettings, key: &str, value: &Value, ttl: u64) {
        let serialized = value.to_string();
        let result = if Self::is_rest(settings) {
            self.rest_command(
                settings,
                serde_json::json!(["SETEX", key, ttl, serialized]),
            )
            .await
            .map(|_| ())
        } else {
            self.tcp_set(settings, key, &serialized, ttl).await
        };
        if let Err(e) = result {
            warn!("KV SET failed for {key}: {e}");
        }
    }

    async fn kv_purge(&self, settings: &ProjectSettings, prefix: &str) {
        let pattern = format!("{prefix}*");
        let result = if Self::is_rest(settings) {
            self.rest_purge(settings, &pattern).await
        } else {
            self.tcp_purge(settings, &pattern).await
        };
        match result {
            Ok(n) if n > 0 => debug!("Purged {n} KV keys matching {pattern}"),
            Ok(_) => {}
            Err(e) => warn!("KV purge failed for {pattern}: {e}"),
        }
    }

    async fn rest_command(
        &self,
        settings: &ProjectSettings,
        command: Value,
    ) -> anyhow::Result<Option<String>> {
        let url = settings.redis_url.clone().unwrap_or_default();
        let token = settings.redis_token.clone().unwrap_or_default();
        let response = self
            .http
            .post(url.trim_end_matches('/'))
            .bearer_auth(token)
            .json(&command)
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            anyhow::bail!("upstash returned {status}: {body}");
        }
        Ok(extract_rest_result(&body))
    }

    async fn rest_purge(&self, settings: &ProjectSettings, pattern: &str) -> anyhow::Result<u64> {
        let keys_raw = self
            .rest_command(settings, serde_json::json!(["KEYS", pattern]))
            .await?;
        let keys: Vec<String> = keys_raw
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        if keys.is_empty() {
            return Ok(0);
        }
        let mut command = vec![Value::String("DEL".to_string())];
        command.extend(keys.into_iter().map(Value::String));
        let deleted = self
            .rest_command(settings, Value::Array(command))
            .await?
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(deleted)
    }

    async fn tcp_connection(
        &self,
        settings: &ProjectSettings,
    ) -> anyhow::Result<redis::aio::MultiplexedConnection> {
        let url = settings.redis_url.clone().unwrap_or_default();
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(
            Duration::from_secs(5),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("redis connect timed out"))??;
        Ok(conn)
    }

    async fn tcp_get(&self, settings: &ProjectSettings, key: &str) -> anyhow::Result<Option<String>> {
        use redis::AsyncCommands;
        let mut conn = self.tcp_connection(settings).await?;
        Ok(conn.get(key).await?)
    }

    async fn tcp_set(
        &self,
        settings: &ProjectSettings,
        key: &str,
        value: &str,
        ttl: u64,
    ) -> anyhow::Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.tcp_connection(settings).await?;
        conn.set_ex::<_, _, ()>(key, value, ttl).await?;
        Ok(())
    }

    async fn tcp_purge(&self, settings: &ProjectSettings, pattern: &str) -> anyhow::Result<u64> {
        use redis::AsyncCommands;
        let mut conn = self.tcp_connection(settings).await?;
        let keys: Vec<String> = conn.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(conn.del(keys).await?)
    }

    /// Ping the configured backend and classify the outcome for the
    /// settings test endpoint.
    pub async fn test_backend(
        &self,
        redis_url: &str,
        redis_token: Option<&str>,
        redis_type: &str,
    ) -> (bool, String) {
        if redis_url.is_empty() {
            return (false, "Redis URL is empty".to_string());
        }

        if redis_type == "upstash" || redis_url.starts_with("http") {
            let Some(token) = redis_token.filter(|t| !t.is_empty()) else {
                return (
                    false,
                    "Redis token is required for Upstash/HTTP connections".to_string(),
                );
            };
            let response = self
                .http
                .post(redis_url.trim_end_matches('/'))
                .bearer_auth(token)
                .json(&serde_json::json!(["PING"]))
                .timeout(Duration::from_secs(5))
                .send()
                .await;
            return match response {
                Ok(resp) if resp.status().is_success() => {
                    let body: Value = resp.json().await.unwrap_or(Value::Null);
                    match extract_rest_result(&body).as_deref() {
                        Some("PONG") => {
                            (true, "Connected successfully (Upstash/HTTP)".to_string())
                        }
                        _ => (true, format!("Connected (response: {body})")),
                    }
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    (false, format!("HTTP {status}: {}", truncate(&body, 100)))
                }
                Err(e) => (false, format!("HTTP connection failed: {e}")),
            };
        }

        let mut settings = ProjectSettings::default();
        settings.redis_url = Some(redis_url.to_string());
        match self.tcp_connection(&settings).await {
            Ok(mut conn) => match redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
            {
                Ok(_) => (true, "Connected successfully (Redis/TCP)".to_string()),
                Err(e) => (false, format!("PING failed: {e}")),
            },
            Err(e) => (false, format!("Connection failed: {e}")),
        }
    }
}

/// Upstash wraps results as `{"result": ...}` (or a list of those for
/// pipelines); unwrap to the raw payload string.
fn extract_rest_result(body: &Value) -> Option<String> {
    let result = match body {
        Value::Object(map) => map.get("result"),
        Value::Array(items) => items.first().and_then(|v| v.get("result")),
        _ => None,
    }?;
    match result {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
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
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn read_key_embeds_table_for_purge() {
        let key = CacheLayer::read_key(
            "wp:data",
            "https://api.example.com",
            "posts",
            50,
            0,
            "[]",
            "",
            "date:desc",
        );
        assert!(key.starts_with("wp:data:posts:"));
        // digest changes when any parameter changes
        let other = CacheLayer::read_key(
            "wp:data",
            "https://api.example.com",
            "posts",
            50,
            10,
            "[]",
            "",
            "date:desc",
        );
        assert_ne!(key, other);
    }

    #[tokio::test]
    async fn l1_round_trip_and_prefix_purge() {
        let cache = CacheLayer::new(SettingsHolder::new());
        cache.set("wp:data:posts:abc", json!([1, 2]), 60).await;
        cache.set("wp:data:users:def", json!([3]), 60).await;
        assert_eq!(cache.get("wp:data:posts:abc").await, Some(json!([1, 2])));

        cache.purge_prefix("wp:data:posts:").await;
        assert_eq!(cache.get("wp:data:posts:abc").await, None);
        assert_eq!(cache.get("wp:data:users:def").await, Some(json!([3])));
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let cache = CacheLayer::new(SettingsHolder::new());
        cache.set("k", json!("v"), 0).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[test]
    fn rest_result_unwrapping() {
        assert_eq!(
            extract_rest_result(&json!({"result": "PONG"})).as_deref(),
            Some("PONG")
        );
        assert_eq!(
            extract_rest_result(&json!([{"result": "PONG"}])).as_deref(),
            Some("PONG")
        );
        assert_eq!(extract_rest_result(&json!({"result": null})), None);
    }
}
