// Field mapping between master and slave schemas: renames, transforms
// via the expression engine, and conflict detection.

use serde_json::Value;

use crate::expression::ExpressionEngine;
use crate::types::{FieldMapping, Record};

pub struct FieldMapper {
    mappings: Vec<FieldMapping>,
    engine: ExpressionEngine,
}

impl FieldMapper {
    pub fn new(mappings: Vec<FieldMapping>) -> Self {
        Self {
            mappings,
            engine: ExpressionEngine::new(),
        }
    }

    /// Transform a master record into slave shape, applying transforms.
    pub fn master_to_slave(&self, record: &Record, slave: Option<&Record>) -> Record {
        let mut result = Record::new();
        for mapping in self.active_mappings() {
            let value = match &mapping.transform {
                Some(transform) => self
                    .engine
                    .evaluate(transform, record, slave)
                    .unwrap_or(Value::Null),
                None => record.get(&mapping.master_column).cloned().unwrap_or(Value::Null),
            };
            result.insert(mapping.slave_column.clone(), value);
        }
        result
    }

    /// Reverse rename only; transforms are one-way.
    pub fn slave_to_master(&self, record: &Record) -> Record {
        let mut result = Record::new();
        for mapping in self.active_mappings() {
            if let Some(value) = record.get(&mapping.slave_column) {
                result.insert(mapping.master_column.clone(), value.clone());
            }
        }
        result
    }

    pub fn key_mapping(&self) -> Option<&FieldMapping> {
        self.mappings.iter().find(|m| m.is_key_field)
    }

    pub fn master_columns(&self) -> Vec<String> {
        self.active_mappings()
            .map(|m| m.master_column.clone())
            .collect()
    }

    pub fn slave_columns(&self) -> Vec<String> {
        self.active_mappings()
            .map(|m| m.slave_column.clone())
            .collect()
    }

    /// Mapped non-key fields whose values differ between sides, with
    /// master-side transforms applied before comparison.
    pub fn find_conflicts(&self, master: &Record, slave: &Record) -> Vec<String> {
        let mut conflicts = Vec::new();
        for mapping in self.active_mappings() {
            if mapping.is_key_field {
                continue;
            }
            let master_val = match &mapping.transform {
                Some(transform) => self
                    .engine
                    .evaluate(transform, master, Some(slave))
                    .unwrap_or(Value::Null),
                None => master.get(&mapping.master_column).cloned().unwrap_or(Value::Null),
            };
            let slave_val = slave
                .get(&mapping.slave_column)
                .cloned()
                .unwrap_or(Value::Null);
            if !values_equal(&master_val, &slave_val) {
                conflicts.push(mapping.master_column.clone());
            }
        }
        conflicts
    }

    fn active_mappings(&self) -> impl Iterator<Item = &FieldMapping> {
        self.mappings.iter().filter(|m| !m.skip_sync)
    }
}

/// Equality tolerant of None-vs-empty-string and numeric-vs-string
/// cross-typing, which different backends produce for the same data.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.is_empty(),
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().unwrap_or(f64::NAN) == y.as_f64().unwrap_or(f64::NAN)
        }
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => s
            .parse::<f64>()
            .map(|parsed| Some(parsed) == n.as_f64())
            .unwrap_or(false),
        (a, b) => value_to_comparable(a) == value_to_comparable(b),
    }
}

fn value_to_comparable(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn mapping(master: &str, slave: &str, key: bool) -> FieldMapping {
        FieldMapping {
            id: format!("fm-{master}"),
            sync_config_id: "cfg".to_string(),
            master_column: master.to_string(),
            slave_column: slave.to_string(),
            transform: None,
            is_key_field: key,
            skip_sync: false,
        }
    }

    fn record(v: Value) -> Record {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn maps_and_renames_columns() {
        let mapper = FieldMapper::new(vec![
            mapping("id", "id", true),
            mapping("title", "headline", false),
        ]);
        let master = record(json!({"id": 42, "title": "New", "ignored": true}));
        let slave = mapper.master_to_slave(&master, None);
        assert_eq!(slave, record(json!({"id": 42, "headline": "New"})));
    }

    #[test]
    fn transform_expressions_apply() {
        let mut m = mapping("title", "title", false);
        m.transform = Some("{{ m.title }}!".to_string());
        let mapper = FieldMapper::new(vec![m]);
        let master = record(json!({"title": "New"}));
        let out = mapper.master_to_slave(&master, None);
        assert_eq!(out.get("title"), Some(&json!("New!")));
    }

    #[test]
    fn skip_sync_mappings_are_inert() {
        let mut m = mapping("secret", "secret", false);
        m.skip_sync = true;
        let mapper = FieldMapper::new(vec![m, mapping("id", "id", true)]);
        let master = record(json!({"secret": "x", "id": 1}));
        let out = mapper.master_to_slave(&master, None);
        assert!(!out.contains_key("secret"));
        assert_eq!(mapper.master_columns(), vec!["id".to_string()]);
    }

    #[test]
    fn conflicts_skip_key_fields_and_tolerate_cross_typing() {
        let mapper = FieldMapper::new(vec![
            mapping("id", "id", true),
            mapping("title", "title", false),
            mapping("count", "count", false),
            mapping("note", "note", false),
        ]);
        let master = record(json!({"id": 42, "title": "New", "count": 7, "note": null}));
        let slave = record(json!({"id": 999, "title": "Old", "count": "7", "note": ""}));
        // id differs but is the key; count/note are equal under tolerance
        assert_eq!(mapper.find_conflicts(&master, &slave), vec!["title".to_string()]);
    }

    #[test]
    fn sync_scenario_source_wins_shape() {
        // master {id, title, status} vs slave with an old title:
        // exactly one conflicting field, "title".
        let mapper = FieldMapper::new(vec![
            mapping("id", "id", true),
            mapping("title", "title", false),
            mapping("status", "status", false),
        ]);
        let master = record(json!({"id": 42, "title": "New", "status": "published"}));
        let slave = record(json!({"id": 42, "title": "Old", "status": "published"}));
        assert_eq!(mapper.find_conflicts(&master, &slave), vec!["title".to_string()]);
    }

    #[test]
    fn value_equality_edge_cases() {
        assert!(values_equal(&json!(null), &json!("")));
        assert!(values_equal(&json!(1.0), &json!(1)));
        assert!(values_equal(&json!("1.5"), &json!(1.5)));
        assert!(!values_equal(&json!("x"), &json!("y")));
        assert!(!values_equal(&json!("abc"), &json!(1)));
    }
}
