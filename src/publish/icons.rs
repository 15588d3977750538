// Icon pre-rendering: batch-fetch referenced SVGs from the CDN at
// publish time and cache them in both tiers so repeated publishes stay
// cheap.

use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::cache::CacheLayer;

const DEFAULT_ICON_CDN: &str = "https://cdn.jsdelivr.net/npm/lucide-static@0.453.0/icons";
const FETCH_CONCURRENCY: usize = 8;

pub struct IconFetcher {
    http: reqwest::Client,
    cache: CacheLayer,
    cdn_base: String,
}

impl IconFetcher {
    pub fn new(cache: CacheLayer) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        let cdn_base = std::env::var("ICON_CDN_URL")
            .unwrap_or_else(|_| DEFAULT_ICON_CDN.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            http,
            cache,
            cdn_base,
        }
    }

    /// Fetch SVG bodies for a set of icon names. Failures drop the icon
    /// from the map; the bundle is still valid, just less enriched.
    #[instrument(skip(self, names))]
    pub async fn fetch_batch(&self, names: &BTreeSet<String>) -> HashMap<String, String> {
        let mut resolved = HashMap::new();
        let mut missing = Vec::new();

        for name in names {
            match self.cache.get(&icon_key(name)).await {
                Some(Value::String(svg)) => {
                    resolved.insert(name.clone(), svg);
                }
                _ => missing.push(name.clone()),
            }
        }
        debug!(
            "icon fetch: {} cached, {} to fetch",
            resolved.len(),
            missing.len()
        );

        for chunk in missing.chunks(FETCH_CONCURRENCY) {
            let fetches = chunk.iter().map(|name| async {
                let svg = self.fetch_one(name).await;
                (name.clone(), svg)
            });
            for (name, svg) in join_all(fetches).await {
                if let Some(svg) = svg {
                    self.cache
                        .set(
                            &icon_key(&name),
                            Value::String(svg.clone()),
                            self.cache.ttl_count(),
                        )
                        .await;
                    resolved.insert(name, svg);
                }
            }
        }
        resolved
    }

    async fn fetch_one(&self, name: &str) -> Option<String> {
        if !is_safe_icon_name(name) {
            warn!("rejecting suspicious icon name: {name}");
            return None;
        }
        let url = format!("{}/{}.svg", self.cdn_base, name);
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) if body.contains("<svg") => Some(body),
                Ok(_) => {
                    warn!("CDN returned non-SVG body for icon {name}");
                    None
                }
                Err(e) => {
                    warn!("failed reading icon {name}: {e}");
                    None
                }
            },
            Ok(response) => {
                warn!("CDN returned {} for icon {name}", response.status());
                None
            }
            Err(e) => {
                warn!("icon fetch failed for {name}: {e}");
                None
            }
        }
    }
}

fn icon_key(name: &str) -> String {
    format!("icon:{name}")
}

fn is_safe_icon_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icon_names_are_validated() {
        assert!(is_safe_icon_name("arrow-right"));
        assert!(is_safe_icon_name("home_2"));
        assert!(!is_safe_icon_name(""));
        assert!(!is_safe_icon_name("../../etc/passwd"));
        assert!(!is_safe_icon_name("a/b"));
    }

    #[tokio::test]
    async fn cached_icons_skip_the_network() {
        let cache = CacheLayer::new(crate::settings::SettingsHolder::new());
        cache
            .set("icon:home", Value::String("<svg>home</svg>".into()), 60)
            .await;
        let fetcher = IconFetcher::new(cache);
        let mut names = BTreeSet::new();
        names.insert("home".to_string());
        let map = fetcher.fetch_batch(&names).await;
        assert_eq!(map.get("home").unwrap(), "<svg>home</svg>");
    }
}
