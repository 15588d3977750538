// Schema cache: the only path through which anything downstream reads
// table schemas or foreign keys. Populated eagerly when a datasource is
// registered, refreshed on demand.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::adapters::{create_adapter, DataAdapter};
use crate::cache::CacheLayer;
use crate::repository::CoreStore;
use crate::types::{Datasource, RelationshipRow, TableSchema};

/// Per-table fetches run in bounded batches so a wide database cannot
/// stampede the backend.
const DISCOVERY_BATCH: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct DiscoverySummary {
    pub tables_discovered: usize,
    pub foreign_keys_discovered: usize,
    pub tables: Vec<String>,
}

#[derive(Clone)]
pub struct SchemaCache {
    store: CoreStore,
    cache: CacheLayer,
}

impl SchemaCache {
    pub fn new(store: CoreStore, cache: CacheLayer) -> Self {
        Self { store, cache }
    }

    #[instrument(skip(self))]
    pub async fn get_cached_schema(
        &self,
        datasource_id: &str,
        table: &str,
    ) -> Result<Option<TableSchema>> {
        self.store.get_schema_entry(datasource_id, table).await
    }

    #[instrument(skip(self))]
    pub async fn get_all_cached_schemas(
        &self,
        datasource_id: &str,
    ) -> Result<Vec<(String, TableSchema)>> {
        self.store.list_schema_entries(datasource_id).await
    }

    /// Discover and cache every table's schema for a datasource.
    /// One table failing is quarantined; the rest still land.
    #[instrument(skip(self, datasource), fields(datasource = %datasource.name))]
    pub async fn discover_all_schemas(&self, datasource: &Datasource) -> Result<DiscoverySummary> {
        info!(
            "Discovering schemas for datasource {} ({})",
            datasource.name, datasource.id
        );
        let adapter = create_adapter(datasource, &self.cache).await?;
        let result = self.discover_with_adapter(datasource, adapter.as_ref()).await;
        let _ = adapter.close().await;
        result
    }

    async fn discover_with_adapter(
        &self,
        datasource: &Datasource,
        adapter: &dyn DataAdapter,
    ) -> Result<DiscoverySummary> {
        let tables = adapter
            .list_tables()
            .await
            .context("table listing failed during discovery")?;
        info!("Found {} tables in {}", tables.len(), datasource.name);

        let mut discovered = Vec::new();
        let mut fk_total = 0usize;

        for batch in tables.chunks(DISCOVERY_BATCH) {
            let fetches = batch.iter().map(|table| {
                let table = table.clone();
                async move {
                    match adapter.get_schema(&table).await {
                        Ok(schema) => Some((table, schema)),
                        Err(e) => {
                            warn!("Failed to get schema for {table}: {e}");
                            None
                        }
                    }
                }
            });
            let results = futures::future::join_all(fetches).await;

            for (table, schema) in results.into_iter().flatten() {
                fk_total += schema.foreign_keys.len();
                self.store
                    .upsert_schema_entry(&datasource.id, &table, &schema)
                    .await?;
                discovered.push(table);
            }
        }

        info!(
            "Discovered {} tables, {} FKs for {}",
            discovered.len(),
            fk_total,
            datasource.name
        );
        Ok(DiscoverySummary {
            tables_discovered: discovered.len(),
            foreign_keys_discovered: fk_total,
            tables: discovered,
        })
    }

    /// Clear and re-discover (user-triggered refresh).
    #[instrument(skip(self, datasource), fields(datasource = %datasource.name))]
    pub async fn refresh_all_schemas(&self, datasource: &Datasource) -> Result<DiscoverySummary> {
        info!("Refreshing all schemas for datasource {}", datasource.name);
        self.store.delete_schema_entries(&datasource.id).await?;
        self.discover_all_schemas(datasource).await
    }

    /// Fetch one table lazily on a cache miss. The fallback for
    /// publish-time lookups; never replaces eager discovery.
    #[instrument(skip(self, datasource), fields(datasource = %datasource.name))]
    pub async fn discover_single_table(
        &self,
        datasource: &Datasource,
        table: &str,
    ) -> Result<TableSchema> {
        let adapter = create_adapter(datasource, &self.cache).await?;
        let schema = adapter.get_schema(table).await;
        let _ = adapter.close().await;
        let schema = match schema {
            Ok(schema) => schema,
            Err(e) => {
                warn!("Lazy discovery for {table} failed: {e:#}");
                return Err(crate::errors::FrontbaseError::SchemaLookupMiss {
                    table: table.to_string(),
                }
                .into());
            }
        };
        self.store
            .upsert_schema_entry(&datasource.id, table, &schema)
            .await?;
        Ok(schema)
    }

    /// Schema for a table, discovering lazily on a miss.
    pub async fn get_schema_or_discover(
        &self,
        datasource: &Datasource,
        table: &str,
    ) -> Result<TableSchema> {
        if let Some(schema) = self.get_cached_schema(&datasource.id, table).await? {
            return Ok(schema);
        }
        self.discover_single_table(datasource, table).await
    }

    /// All FK edges for a datasource, aggregated from cached schemas and
    /// normalized to one row per (source column, referred column) pair.
    #[instrument(skip(self))]
    pub async fn get_all_relationships(
        &self,
        datasource_id: &str,
    ) -> Result<Vec<RelationshipRow>> {
        let entries = self.store.list_schema_entries(datasource_id).await?;
        Ok(aggregate_relationships(&entries))
    }
}

pub(crate) fn aggregate_relationships(
    entries: &[(String, TableSchema)],
) -> Vec<RelationshipRow> {
    let mut relationships = Vec::new();
    for (table_name, schema) in entries {
        for fk in &schema.foreign_keys {
            // Composite FKs expand pairwise; a missing referred column
            // defaults to id, matching how single-column FKs are stored.
            let pairs = fk
                .constrained_columns
                .iter()
                .enumerate()
                .map(|(i, source)| {
                    let target = fk
                        .referred_columns
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| "id".to_string());
                    (source.clone(), target)
                });
            for (source_column, target_column) in pairs {
                relationships.push(RelationshipRow {
                    source_table: table_name.clone(),
                    source_column,
                    target_table: fk.referred_table.clone(),
                    target_column,
                });
            }
        }
    }
    relationships
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FkDef;

    #[test]
    fn relationships_normalize_one_row_per_column_pair() {
        let entries = vec![(
            "orders".to_string(),
            TableSchema {
                columns: vec![],
                foreign_keys: vec![
                    FkDef {
                        constrained_columns: vec!["customer_id".into()],
                        referred_table: "customers".into(),
                        referred_columns: vec!["id".into()],
                    },
                    FkDef {
                        constrained_columns: vec!["region".into(), "zone".into()],
                        referred_table: "territories".into(),
                        referred_columns: vec!["region".into(), "zone".into()],
                    },
                ],
            },
        )];
        let rows = aggregate_relationships(&entries);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].source_column, "customer_id");
        assert_eq!(rows[0].target_table, "customers");
        assert_eq!(rows[2].source_column, "zone");
        assert_eq!(rows[2].target_column, "zone");
    }

    #[test]
    fn missing_referred_column_defaults_to_id() {
        let entries = vec![(
            "posts".to_string(),
            TableSchema {
                columns: vec![],
                foreign_keys: vec![FkDef {
                    constrained_columns: vec!["author_id".into()],
                    referred_table: "users".into(),
                    referred_columns: vec![],
                }],
            },
        )];
        let rows = aggregate_relationships(&entries);
        assert_eq!(rows[0].target_column, "id");
    }
}
