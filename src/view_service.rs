// View reads: filtered adapter data with mapping expressions applied,
// linked views joined per record, and visible-column projection.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{instrument, warn};

use crate::adapters::{create_adapter, ReadQuery};
use crate::cache::CacheLayer;
use crate::errors::FrontbaseError;
use crate::expression::ExpressionEngine;
use crate::filtering::{FilterExpr, FilterOperator};
use crate::repository::CoreStore;
use crate::types::{DatasourceView, Record};

#[derive(Clone)]
pub struct ViewService {
    store: CoreStore,
    cache: CacheLayer,
    engine: ExpressionEngine,
    http: reqwest::Client,
}

#[derive(Debug, serde::Serialize)]
pub struct ViewPage {
    pub records: Vec<Record>,
    pub total_records: i64,
    pub current_page: i64,
    pub total_pages: i64,
    pub per_page: i64,
    pub view_name: String,
    pub datasource_name: String,
    pub target_table: String,
    pub visible_columns: Vec<String>,
}

impl ViewService {
    pub fn new(store: CoreStore, cache: CacheLayer) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            store,
            cache,
            engine: ExpressionEngine::new(),
            http,
        }
    }

    #[instrument(skip(self))]
    pub async fn read_view(&self, view_id: &str, page: i64, limit: i64) -> Result<ViewPage> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        let offset = (page - 1) * limit;

        let view = self
            .store
            .get_view(view_id)
            .await?
            .ok_or_else(|| FrontbaseError::NotFound("view".to_string()))?;
        let datasource = self
            .store
            .get_datasource(&view.datasource_id)
            .await?
            .ok_or_else(|| FrontbaseError::NotFound("datasource".to_string()))?;

        let filters = FilterExpr::parse_list(&view.filters);
        let adapter = create_adapter(&datasource, &self.cache).await?;

        let mut query = ReadQuery::with_limit(limit);
        query.offset = offset;
        query.filters = filters.clone();
        let records = adapter.read_records(&view.target_table, &query).await;
        let total = adapter.count_records(&view.target_table, &filters).await;
        let _ = adapter.close().await;

        let records = records?;
        let total = total?.max(records.len() as i64 + offset);

        let mut enriched = Vec::with_capacity(records.len());
        for record in records {
            enriched.push(self.enrich_record(&view, record).await);
        }

        let projected = project_visible(enriched, &view.visible_columns);
        let total_pages = if limit > 0 {
            (total + limit - 1) / limit
        } else {
            1
        };

        Ok(ViewPage {
            records: projected,
            total_records: total,
            current_page: page,
            total_pages,
            per_page: limit,
            view_name: view.name,
            datasource_name: datasource.name,
            target_table: view.target_table,
            visible_columns: view.visible_columns,
        })
    }

    #[instrument(skip(self))]
    pub async fn count_view(&self, view_id: &str) -> Result<(DatasourceView, String, i64)> {
        let view = self
            .store
            .get_view(view_id)
            .await?
            .ok_or_else(|| FrontbaseError::NotFound("view".to_string()))?;
        let datasource = self
            .store
            .get_datasource(&view.datasource_id)
            .await?
            .ok_or_else(|| FrontbaseError::NotFound("datasource".to_string()))?;

        let filters = FilterExpr::parse_list(&view.filters);
        let adapter = create_adapter(&datasource, &self.cache).await?;
        let total = adapter.count_records(&view.target_table, &filters).await;
        let _ = adapter.close().await;

        Ok((view, datasource.name, total?))
    }

    /// Apply mapping expressions, then attach linked-view records under
    /// their aliases. Linked fetch failures degrade to a warning.
    async fn enrich_record(&self, view: &DatasourceView, mut record: Record) -> Record {
        if let Some(mappings) = view.field_mappings.as_object() {
            for (target, expression) in mappings {
                let Some(expr) = expression.as_str() else { continue };
                if let Some(value) = self.engine.evaluate(expr, &record, None) {
                    if !value.is_null() {
                        record.insert(target.clone(), value);
                    }
                }
            }
        }

        if let Some(links) = view.linked_views.as_object() {
            for (alias, link) in links {
                match self.fetch_linked(link, &record).await {
                    Ok(Some(linked)) => {
                        record.insert(alias.clone(), Value::Object(linked));
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Failed to fetch linked record for {alias}: {e}"),
                }
            }
        }
        record
    }

    async fn fetch_linked(&self, link: &Value, record: &Record) -> Result<Option<Record>> {
        let Some(view_id) = link.get("view_id").and_then(Value::as_str) else {
            return Ok(None);
        };
        let join_on = link.get("join_on").and_then(Value::as_str).unwrap_or("id");
        let target_key = link
            .get("target_key")
            .and_then(Value::as_str)
            .unwrap_or("id");
        let Some(join_value) = record.get(join_on) else {
            return Ok(None);
        };

        let linked_view = self
            .store
            .get_view(view_id)
            .await?
            .context("linked view not found")?;
        let linked_ds = self
            .store
            .get_datasource(&linked_view.datasource_id)
            .await?
            .context("linked datasource not found")?;

        let adapter = create_adapter(&linked_ds, &self.cache).await?;
        let mut query = ReadQuery::with_limit(1);
        query.filters = vec![FilterExpr::new(
            target_key,
            FilterOperator::Eq,
            join_value.clone(),
        )];
        let result = adapter.read_records(&linked_view.target_table, &query).await;
        let _ = adapter.close().await;
        Ok(result?.into_iter().next())
    }

    /// Map the incoming payload through the view's expressions and
    /// forward it to every registered webhook without blocking.
    #[instrument(skip(self, payload))]
    pub async fn trigger_view(&self, view_id: &str, payload: Record) -> Result<(Record, usize)> {
        let view = self
            .store
            .get_view(view_id)
            .await?
            .ok_or_else(|| FrontbaseError::NotFound("view".to_string()))?;

        let transformed = match view.field_mappings.as_object() {
            Some(mappings) if !mappings.is_empty() => {
                let mut out = Record::new();
                for (target, expression) in mappings {
                    let Some(expr) = expression.as_str() else { continue };
                    let value = self
                        .engine
                        .evaluate(expr, &payload, None)
                        .unwrap_or_else(|| Value::String(expr.to_string()));
                    out.insert(target.clone(), value);
                }
                out
            }
            _ => payload,
        };

        let webhooks: Vec<String> = view
            .webhooks
            .as_array()
            .map(|hooks| {
                hooks
                    .iter()
                    .filter_map(|h| h.get("url").and_then(Value::as_str))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let count = webhooks.len();
        for url in webhooks {
            let http = self.http.clone();
            let body = json!(transformed.clone());
            tokio::spawn(async move {
                if let Err(e) = http.post(&url).json(&body).send().await {
                    warn!("Failed to forward webhook to {url}: {e}");
                }
            });
        }

        Ok((transformed, count))
    }
}

fn project_visible(records: Vec<Record>, visible: &[String]) -> Vec<Record> {
    if visible.is_empty() {
        return records;
    }
    records
        .into_iter()
        .map(|record| {
            record
                .into_iter()
                .filter(|(k, _)| visible.contains(k))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn visible_column_projection() {
        let records = vec![json!({"a": 1, "b": 2, "c": 3})
            .as_object()
            .unwrap()
            .clone()];
        let out = project_visible(records.clone(), &["a".to_string(), "c".to_string()]);
        assert_eq!(out[0], json!({"a": 1, "c": 3}).as_object().unwrap().clone());

        let unprojected = project_visible(records, &[]);
        assert_eq!(unprojected[0].len(), 3);
    }
}
