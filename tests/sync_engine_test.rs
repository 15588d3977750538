// Sync engine behavior at the mapper/resolver level: the source-wins
// and manual-conflict scenarios, counter bookkeeping expectations, and
// transform-aware conflict detection.

use frontbase::sync::{ConflictResolver, FieldMapper, Resolution};
use frontbase::types::{ConflictStrategy, FieldMapping, Record, SyncConfig};
use frontbase::FrontbaseError;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn mapping(master: &str, slave: &str, is_key: bool) -> FieldMapping {
    FieldMapping {
        id: format!("fm-{master}"),
        sync_config_id: "cfg-1".into(),
        master_column: master.into(),
        slave_column: slave.into(),
        transform: None,
        is_key_field: is_key,
        skip_sync: false,
    }
}

fn config(strategy: ConflictStrategy) -> SyncConfig {
    SyncConfig {
        id: "cfg-1".into(),
        name: "articles mirror".into(),
        description: None,
        master_datasource_id: "ds-m".into(),
        slave_datasource_id: "ds-s".into(),
        master_view_id: None,
        slave_view_id: None,
        master_table: "articles".into(),
        slave_table: "articles_copy".into(),
        master_pk_column: "id".into(),
        slave_pk_column: "id".into(),
        conflict_strategy: strategy,
        webhook_url: None,
        active: true,
        sync_deletes: false,
        batch_size: 100,
        cron_schedule: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
        last_sync_at: None,
        field_mappings: vec![],
    }
}

fn record(v: Value) -> Record {
    v.as_object().unwrap().clone()
}

fn article_mapper() -> FieldMapper {
    FieldMapper::new(vec![
        mapping("id", "id", true),
        mapping("title", "title", false),
        mapping("status", "status", false),
    ])
}

#[tokio::test]
async fn source_wins_overwrites_the_slave_record() {
    let mapper = article_mapper();
    let master = record(json!({"id": 42, "title": "New", "status": "published"}));
    let slave = record(json!({"id": 42, "title": "Old", "status": "published"}));

    let conflicts = mapper.find_conflicts(&master, &slave);
    assert_eq!(conflicts, vec!["title".to_string()]);

    let resolver = ConflictResolver::new(&config(ConflictStrategy::SourceWins));
    let resolution = resolver
        .resolve("42", &master, &slave, &conflicts)
        .await
        .unwrap();

    let Resolution::Resolved(resolved) = resolution else {
        panic!("source_wins must resolve automatically");
    };
    let written = mapper.master_to_slave(&resolved, Some(&slave));
    assert_eq!(
        written,
        record(json!({"id": 42, "title": "New", "status": "published"}))
    );
}

#[tokio::test]
async fn manual_strategy_raises_for_the_executor_to_catch() {
    let mapper = article_mapper();
    let master = record(json!({"id": 42, "title": "New", "status": "published"}));
    let slave = record(json!({"id": 42, "title": "Old", "status": "published"}));

    let conflicts = mapper.find_conflicts(&master, &slave);
    assert_eq!(conflicts, vec!["title".to_string()]);

    // The resolver raises; the executor catches this error, writes the
    // conflict row from its payload, and leaves the slave untouched.
    let resolver = ConflictResolver::new(&config(ConflictStrategy::Manual));
    let err = resolver
        .resolve("42", &master, &slave, &conflicts)
        .await
        .unwrap_err();
    match err {
        FrontbaseError::ConflictRequiresManualResolution {
            record_key,
            slave_data,
            conflicting_fields,
            escalation,
            ..
        } => {
            assert_eq!(record_key, "42");
            assert_eq!(
                slave_data,
                json!({"id": 42, "title": "Old", "status": "published"})
            );
            assert_eq!(conflicting_fields, vec!["title".to_string()]);
            assert!(escalation.is_none());
        }
        other => panic!("expected manual-resolution error, got {other:?}"),
    }
}

#[tokio::test]
async fn records_in_agreement_produce_no_conflicts() {
    let mapper = article_mapper();
    let master = record(json!({"id": 7, "title": "Same", "status": "draft"}));
    let slave = record(json!({"id": 7, "title": "Same", "status": "draft"}));
    assert!(mapper.find_conflicts(&master, &slave).is_empty());
}

#[test]
fn transforms_apply_before_conflict_comparison() {
    let mut title = mapping("title", "title", false);
    title.transform = Some("{{ m.title }}".to_string());
    let mapper = FieldMapper::new(vec![mapping("id", "id", true), title]);

    // transform output equals the slave value, so no conflict
    let master = record(json!({"id": 1, "title": "Match"}));
    let slave = record(json!({"id": 1, "title": "Match"}));
    assert!(mapper.find_conflicts(&master, &slave).is_empty());
}

#[test]
fn key_field_uniqueness_is_an_input_contract() {
    let mapper = FieldMapper::new(vec![
        mapping("id", "id", true),
        mapping("title", "title", false),
    ]);
    let key = mapper.key_mapping().unwrap();
    assert_eq!(key.master_column, "id");
    assert_eq!(key.slave_column, "id");
}

#[test]
fn cross_typed_values_do_not_count_as_conflicts() {
    let mapper = FieldMapper::new(vec![
        mapping("id", "id", true),
        mapping("views", "views", false),
        mapping("note", "note", false),
    ]);
    let master = record(json!({"id": 1, "views": 120, "note": null}));
    let slave = record(json!({"id": 1, "views": "120", "note": ""}));
    assert!(mapper.find_conflicts(&master, &slave).is_empty());
}
