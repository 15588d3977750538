// Contract tests for the shared filter machinery and the expression
// engine, fed with the raw JSON shapes the REST surface receives.

use frontbase::expression::ExpressionEngine;
use frontbase::filtering::{build_where_clause, record_matches, FilterExpr, SqlDialect};
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn filter_lists_parse_from_wire_shapes() {
    // list form from ?filters=<json>
    let raw = json!([
        {"field": "status", "operator": "==", "value": "publish"},
        {"field": "views", "operator": ">", "value": 100},
        {"field": "bio", "operator": "is_empty"},
        {"field": "tag", "operator": "in", "value": "a,b,c"}
    ]);
    let filters = FilterExpr::parse_list(&raw);
    assert_eq!(filters.len(), 4);

    // shorthand object form used by view definitions
    let shorthand = json!({"post_type": "institution"});
    let filters = FilterExpr::parse_list(&shorthand);
    assert_eq!(filters.len(), 1);
    assert_eq!(filters[0].field, "post_type");
}

#[test]
fn unknown_operators_never_reach_sql() {
    let raw = json!([
        {"field": "name", "operator": "'; DROP TABLE users; --", "value": "x"},
        {"field": "name", "operator": "regex", "value": ".*"},
        {"field": "name", "operator": "==", "value": "safe"}
    ]);
    let filters = FilterExpr::parse_list(&raw);
    let clause = build_where_clause(&filters, SqlDialect::Postgres);
    assert_eq!(clause.sql, r#" WHERE CAST("name" AS TEXT) = $1"#);
    assert_eq!(clause.params, vec![json!("safe")]);
}

#[test]
fn postgres_and_mysql_dialects_differ_only_in_plumbing() {
    let filters = vec![
        FilterExpr::new(
            "status",
            frontbase::filtering::FilterOperator::Eq,
            json!("live"),
        ),
        FilterExpr::new(
            "score",
            frontbase::filtering::FilterOperator::Lt,
            json!(10),
        ),
    ];
    let pg = build_where_clause(&filters, SqlDialect::Postgres);
    let my = build_where_clause(&filters, SqlDialect::Mysql);

    assert_eq!(pg.sql, r#" WHERE CAST("status" AS TEXT) = $1 AND "score" < $2"#);
    assert_eq!(my.sql, " WHERE CAST(`status` AS CHAR) = ? AND `score` < ?");
    assert_eq!(pg.params, my.params);
}

#[test]
fn client_side_matching_mirrors_sql_semantics() {
    let record = json!({
        "status": "Publish",
        "views": 150,
        "meta": {"featured": "yes"},
        "bio": ""
    });
    let raw = json!([
        {"field": "status", "operator": "==", "value": "publish"},
        {"field": "views", "operator": ">", "value": "100"},
        {"field": "meta.featured", "operator": "==", "value": "YES"},
        {"field": "bio", "operator": "is_empty"}
    ]);
    let filters = FilterExpr::parse_list(&raw);
    assert!(record_matches(&record, &filters));

    let not_in = FilterExpr::parse_list(&json!([
        {"field": "status", "operator": "not_in", "value": "publish,draft"}
    ]));
    assert!(!record_matches(&record, &not_in));
}

#[test]
fn expression_engine_contract() {
    let engine = ExpressionEngine::new();
    let master = json!({"title": "Story", "price": 12, "live": "true"})
        .as_object()
        .unwrap()
        .clone();
    let slave = json!({"note": "old"}).as_object().unwrap().clone();

    // @ sugar
    assert_eq!(
        engine.evaluate("@title", &master, None),
        Some(json!("Story"))
    );
    // bare key resolves, unknown bare string is a literal
    assert_eq!(engine.evaluate("price", &master, None), Some(json!(12)));
    assert_eq!(
        engine.evaluate("not-a-key", &master, None),
        Some(json!("not-a-key"))
    );
    // both bindings are in scope
    assert_eq!(
        engine.evaluate("{{ m.title }}/{{ s.note }}", &master, Some(&slave)),
        Some(json!("Story/old"))
    );
    // coercion back to scalars
    assert_eq!(engine.evaluate("{{ m.live }}", &master, None), Some(json!(true)));
    // broken syntax resolves to None, never an error
    assert_eq!(engine.evaluate("{{ m.title", &master, None), None);
}
