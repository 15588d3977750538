// Filter expressions and the shared SQL WHERE-clause builder used by
// every SQL adapter. Unknown operators never reach the wire: they are
// dropped, not interpolated.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed operator set accepted from the builder UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "starts_with")]
    StartsWith,
    #[serde(rename = "ends_with")]
    EndsWith,
    #[serde(rename = "is_empty")]
    IsEmpty,
    #[serde(rename = "is_not_empty")]
    IsNotEmpty,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = "not_contains")]
    NotContains,
}

impl FilterOperator {
    /// Parse, returning `None` for anything outside the closed set.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "==" | "eq" => Some(FilterOperator::Eq),
            "!=" | "neq" => Some(FilterOperator::Ne),
            ">" => Some(FilterOperator::Gt),
            "<" => Some(FilterOperator::Lt),
            "contains" => Some(FilterOperator::Contains),
            "starts_with" => Some(FilterOperator::StartsWith),
            "ends_with" => Some(FilterOperator::EndsWith),
            "is_empty" => Some(FilterOperator::IsEmpty),
            "is_not_empty" => Some(FilterOperator::IsNotEmpty),
            "in" => Some(FilterOperator::In),
            "not_in" => Some(FilterOperator::NotIn),
            "not_contains" => Some(FilterOperator::NotContains),
            _ => None,
        }
    }

    /// Operators that take no bound value.
    pub fn is_empty_check(&self) -> bool {
        matches!(self, FilterOperator::IsEmpty | FilterOperator::IsNotEmpty)
    }

    /// Operators whose value arrives as a UI string and whose column must
    /// therefore be cast to text before comparison.
    fn needs_text_cast(&self) -> bool {
        !matches!(self, FilterOperator::Gt | FilterOperator::Lt)
    }
}

/// One filter condition. `value` is absent only for empty-check operators.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpr {
    pub field: String,
    pub operator: FilterOperator,
    pub value: Option<Value>,
}

impl FilterExpr {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value: Some(value),
        }
    }

    /// Parse a JSON filter list or object into expressions.
    ///
    /// Accepts the list form `[{"field","operator","value"}]` and the
    /// shorthand object form `{"col": value}` (implicit `==`). Entries
    /// with unknown operators or missing fields are dropped.
    pub fn parse_list(raw: &Value) -> Vec<FilterExpr> {
        let mut out = Vec::new();
        match raw {
            Value::Array(items) => {
                for item in items {
                    let Some(obj) = item.as_object() else { continue };
                    let Some(field) = obj.get("field").and_then(Value::as_str) else {
                        continue;
                    };
                    let op_str = obj.get("operator").and_then(Value::as_str).unwrap_or("==");
                    let Some(operator) = FilterOperator::parse(op_str) else {
                        continue;
                    };
                    let value = obj.get("value").cloned().filter(|v| !v.is_null());
                    if value.is_none() && !operator.is_empty_check() {
                        continue;
                    }
                    out.push(FilterExpr {
                        field: field.to_string(),
                        operator,
                        value,
                    });
                }
            }
            Value::Object(map) => {
                for (field, value) in map {
                    if value.is_null() {
                        continue;
                    }
                    out.push(FilterExpr {
                        field: field.clone(),
                        operator: FilterOperator::Eq,
                        value: Some(value.clone()),
                    });
                }
            }
            _ => {}
        }
        out
    }

    fn value_str(&self) -> String {
        match &self.value {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

/// Placeholder dialect for the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    /// `$1, $2, …` with `"ident"` quoting
    Postgres,
    /// `?` with `` `ident` `` quoting
    Mysql,
}

impl SqlDialect {
    fn placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${index}"),
            SqlDialect::Mysql => "?".to_string(),
        }
    }

    pub fn quote_ident(&self, ident: &str) -> String {
        // Dotted identifiers refer to related tables and are quoted
        // per-part, matching the flattened "table.col" output contract.
        let quote = |part: &str| match self {
            SqlDialect::Postgres => format!("\"{}\"", part.replace('"', "")),
            SqlDialect::Mysql => format!("`{}`", part.replace('`', "")),
        };
        match ident.split_once('.') {
            Some((table, col)) => format!("{}.{}", quote(table), quote(col)),
            None => quote(ident),
        }
    }
}

/// A rendered WHERE clause plus the values to bind, in order.
#[derive(Debug, Clone, Default)]
pub struct WhereClause {
    /// Includes the leading ` WHERE ` when non-empty.
    pub sql: String,
    pub params: Vec<Value>,
}

/// Render a filter list into a WHERE clause for the given dialect.
///
/// String-accepting operators wrap the column in `CAST(col AS
/// {TEXT|CHAR})` so typed columns tolerate UI-provided strings. `in` /
/// `not_in` split comma-separated values into individual placeholders.
pub fn build_where_clause(filters: &[FilterExpr], dialect: SqlDialect) -> WhereClause {
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    let cast_type = match dialect {
        SqlDialect::Postgres => "TEXT",
        SqlDialect::Mysql => "CHAR",
    };

    for f in filters {
        let quoted = dialect.quote_ident(&f.field);
        let col_expr = if f.operator.needs_text_cast() {
            format!("CAST({quoted} AS {cast_type})")
        } else {
            quoted.clone()
        };

        match f.operator {
            FilterOperator::Eq => {
                params.push(Value::String(f.value_str()));
                let p = dialect.placeholder(params.len());
                conditions.push(format!("{col_expr} = {p}"));
            }
            FilterOperator::Ne => {
                params.push(Value::String(f.value_str()));
                let p = dialect.placeholder(params.len());
                conditions.push(format!("{col_expr} != {p}"));
            }
            FilterOperator::Gt => {
                params.push(f.value.clone().unwrap_or(Value::Null));
                let p = dialect.placeholder(params.len());
                conditions.push(format!("{quoted} > {p}"));
            }
            FilterOperator::Lt => {
                params.push(f.value.clone().unwrap_or(Value::Null));
                let p = dialect.placeholder(params.len());
                conditions.push(format!("{quoted} < {p}"));
            }
            FilterOperator::Contains => {
                params.push(Value::String(format!("%{}%", f.value_str())));
                let p = dialect.placeholder(params.len());
                conditions.push(format!("{col_expr} LIKE {p}"));
            }
            FilterOperator::NotContains => {
                params.push(Value::String(format!("%{}%", f.value_str())));
                let p = dialect.placeholder(params.len());
                conditions.push(format!("{col_expr} NOT LIKE {p}"));
            }
            FilterOperator::StartsWith => {
                params.push(Value::String(format!("{}%", f.value_str())));
                let p = dialect.placeholder(params.len());
                conditions.push(format!("{col_expr} LIKE {p}"));
            }
            FilterOperator::EndsWith => {
                params.push(Value::String(format!("%{}", f.value_str())));
                let p = dialect.placeholder(params.len());
                conditions.push(format!("{col_expr} LIKE {p}"));
            }
            FilterOperator::IsEmpty => {
                conditions.push(format!("({col_expr} IS NULL OR {col_expr} = '')"));
            }
            FilterOperator::IsNotEmpty => {
                conditions.push(format!("({col_expr} IS NOT NULL AND {col_expr} != '')"));
            }
            FilterOperator::In | FilterOperator::NotIn => {
                let vals: Vec<String> = f
                    .value_str()
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect();
                if vals.is_empty() {
                    continue;
                }
                let mut placeholders = Vec::with_capacity(vals.len());
                for v in vals {
                    params.push(Value::String(v));
                    placeholders.push(dialect.placeholder(params.len()));
                }
                let keyword = if f.operator == FilterOperator::In {
                    "IN"
                } else {
                    "NOT IN"
                };
                conditions.push(format!("{col_expr} {keyword} ({})", placeholders.join(", ")));
            }
        }
    }

    if conditions.is_empty() {
        return WhereClause::default();
    }
    WhereClause {
        sql: format!(" WHERE {}", conditions.join(" AND ")),
        params,
    }
}

/// Client-side filter evaluation for adapters whose backend cannot
/// express the operator natively (WP-REST meta fields). Dotted fields
/// traverse nested objects.
pub fn record_matches(record: &Value, filters: &[FilterExpr]) -> bool {
    for f in filters {
        let actual = lookup_path(record, &f.field);
        let actual_str = match &actual {
            Some(Value::String(s)) => s.to_lowercase(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string().to_lowercase(),
        };
        let target_str = f.value_str().to_lowercase();

        let ok = match f.operator {
            FilterOperator::Eq => actual_str == target_str,
            FilterOperator::Ne => actual_str != target_str,
            FilterOperator::Contains => actual_str.contains(&target_str),
            FilterOperator::NotContains => !actual_str.contains(&target_str),
            FilterOperator::StartsWith => actual_str.starts_with(&target_str),
            FilterOperator::EndsWith => actual_str.ends_with(&target_str),
            FilterOperator::IsEmpty => actual_str.is_empty(),
            FilterOperator::IsNotEmpty => !actual_str.is_empty(),
            FilterOperator::In => target_str
                .split(',')
                .map(str::trim)
                .any(|v| v == actual_str),
            FilterOperator::NotIn => !target_str
                .split(',')
                .map(str::trim)
                .any(|v| v == actual_str),
            FilterOperator::Gt | FilterOperator::Lt => {
                let a = actual.as_ref().and_then(value_as_f64);
                let b = f.value.as_ref().and_then(value_as_f64);
                match (a, b) {
                    (Some(a), Some(b)) => {
                        if f.operator == FilterOperator::Gt {
                            a > b
                        } else {
                            a < b
                        }
                    }
                    _ => false,
                }
            }
        };
        if !ok {
            return false;
        }
    }
    true
}

fn lookup_path(record: &Value, path: &str) -> Option<Value> {
    let mut current = record.clone();
    for part in path.split('.') {
        match current {
            Value::Object(ref map) => {
                current = map.get(part)?.clone();
            }
            _ => return None,
        }
    }
    Some(current)
}

fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn unknown_operator_is_dropped_not_injected() {
        let raw = json!([
            {"field": "name", "operator": "ILIKE OR 1=1 --", "value": "x"},
            {"field": "name", "operator": "==", "value": "x"}
        ]);
        let filters = FilterExpr::parse_list(&raw);
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].operator, FilterOperator::Eq);
    }

    #[test]
    fn postgres_clause_casts_string_operators() {
        let filters = vec![FilterExpr::new("status", FilterOperator::Eq, json!("live"))];
        let clause = build_where_clause(&filters, SqlDialect::Postgres);
        assert_eq!(clause.sql, r#" WHERE CAST("status" AS TEXT) = $1"#);
        assert_eq!(clause.params, vec![json!("live")]);
    }

    #[test]
    fn comparison_operators_skip_the_cast() {
        let filters = vec![FilterExpr::new("price", FilterOperator::Gt, json!(10))];
        let clause = build_where_clause(&filters, SqlDialect::Postgres);
        assert_eq!(clause.sql, r#" WHERE "price" > $1"#);
    }

    #[test]
    fn in_expands_comma_separated_values() {
        let filters = vec![FilterExpr::new(
            "status",
            FilterOperator::In,
            json!("draft, live ,archived"),
        )];
        let clause = build_where_clause(&filters, SqlDialect::Postgres);
        assert_eq!(
            clause.sql,
            r#" WHERE CAST("status" AS TEXT) IN ($1, $2, $3)"#
        );
        assert_eq!(clause.params.len(), 3);
        assert_eq!(clause.params[1], json!("live"));
    }

    #[test]
    fn dotted_field_quotes_both_parts() {
        let filters = vec![FilterExpr::new(
            "countries.country",
            FilterOperator::Eq,
            json!("France"),
        )];
        let clause = build_where_clause(&filters, SqlDialect::Postgres);
        assert!(clause
            .sql
            .contains(r#"CAST("countries"."country" AS TEXT)"#));
    }

    #[test]
    fn mysql_uses_question_marks_and_backticks() {
        let filters = vec![
            FilterExpr::new("a", FilterOperator::Contains, json!("x")),
            FilterExpr::new("b", FilterOperator::Lt, json!(3)),
        ];
        let clause = build_where_clause(&filters, SqlDialect::Mysql);
        assert_eq!(
            clause.sql,
            " WHERE CAST(`a` AS CHAR) LIKE ? AND `b` < ?"
        );
    }

    #[test]
    fn empty_checks_need_no_value() {
        let raw = json!([{"field": "bio", "operator": "is_empty"}]);
        let filters = FilterExpr::parse_list(&raw);
        assert_eq!(filters.len(), 1);
        let clause = build_where_clause(&filters, SqlDialect::Postgres);
        assert!(clause.sql.contains("IS NULL OR"));
        assert!(clause.params.is_empty());
    }

    #[test]
    fn client_side_matcher_traverses_dotted_paths() {
        let record = json!({"title": {"rendered": "Hello World"}, "status": "publish"});
        let filters = vec![
            FilterExpr::new("title.rendered", FilterOperator::Contains, json!("world")),
            FilterExpr::new("status", FilterOperator::Eq, json!("publish")),
        ];
        assert!(record_matches(&record, &filters));

        let miss = vec![FilterExpr::new(
            "title.rendered",
            FilterOperator::Eq,
            json!("Other"),
        )];
        assert!(!record_matches(&record, &miss));
    }

    #[test]
    fn numeric_comparison_coerces_strings() {
        let record = json!({"price": "19.5"});
        let filters = vec![FilterExpr::new("price", FilterOperator::Gt, json!(10))];
        assert!(record_matches(&record, &filters));
    }
}
