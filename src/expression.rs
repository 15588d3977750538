// Sandboxed template evaluator for field mappings and view transforms.
//
// Exactly two names are in scope: `master` (alias `m`) and `slave`
// (alias `s`). There is no ambient state and no way to reach it; user
// expressions never touch a general evaluator.

use serde_json::Value;

use crate::types::Record;

/// Evaluates mapping expressions of the form:
///
/// - `@title` — sugar for `{{ master['title'] }}`
/// - `{{ master['title'] }} ({{ s.year }})` — template with lookups
/// - `title` — literal lookup: the master value if the key exists,
///   otherwise the string itself
///
/// Rendered output is coerced back to bool / int / float when the whole
/// result is unambiguously convertible. Syntax errors and failed lookups
/// inside `{{ }}` resolve to `None`; they never propagate.
#[derive(Debug, Default, Clone)]
pub struct ExpressionEngine;

impl ExpressionEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        expression: &str,
        master: &Record,
        slave: Option<&Record>,
    ) -> Option<Value> {
        if expression.is_empty() {
            return None;
        }

        // @field shorthand
        let expression = if let Some(field) = expression.strip_prefix('@') {
            format!("{{{{ master['{field}'] }}}}")
        } else {
            expression.to_string()
        };

        if !expression.contains("{{") {
            // Literal lookup path: a bare key resolves against master,
            // `master.field` notation resolves explicitly, anything else
            // passes through as the raw string.
            if let Some(v) = master.get(expression.as_str()) {
                return Some(v.clone());
            }
            if let Some(field) = expression.strip_prefix("master.") {
                return Some(master.get(field).cloned().unwrap_or(Value::Null));
            }
            return Some(Value::String(expression));
        }

        self.render(&expression, master, slave)
    }

    /// Check whether the template delimiters are balanced and every
    /// placeholder parses.
    pub fn validate_syntax(&self, expression: &str) -> bool {
        match split_template(expression) {
            Some(parts) => parts
                .iter()
                .all(|p| !matches!(p, Part::Expr(e) if parse_lookup(e).is_none())),
            None => false,
        }
    }

    fn render(&self, template: &str, master: &Record, slave: Option<&Record>) -> Option<Value> {
        let parts = split_template(template)?;

        // A template that is a single placeholder keeps the looked-up
        // value's type instead of flattening to a string.
        if let [Part::Expr(expr)] = parts.as_slice() {
            let value = eval_lookup(expr, master, slave)?;
            return Some(coerce(value));
        }

        let mut rendered = String::new();
        for part in &parts {
            match part {
                Part::Literal(text) => rendered.push_str(text),
                Part::Expr(expr) => {
                    let value = eval_lookup(expr, master, slave)?;
                    rendered.push_str(&value_to_string(&value));
                }
            }
        }
        Some(coerce(Value::String(rendered)))
    }
}

#[derive(Debug, PartialEq)]
enum Part {
    Literal(String),
    Expr(String),
}

/// Split a template into literal and `{{ }}` parts. Returns `None` on
/// unbalanced delimiters.
fn split_template(template: &str) -> Option<Vec<Part>> {
    let mut parts = Vec::new();
    let mut rest = template;
    loop {
        match rest.find("{{") {
            None => {
                if rest.contains("}}") {
                    return None;
                }
                if !rest.is_empty() {
                    parts.push(Part::Literal(rest.to_string()));
                }
                return Some(parts);
            }
            Some(open) => {
                if open > 0 {
                    parts.push(Part::Literal(rest[..open].to_string()));
                }
                let after = &rest[open + 2..];
                let close = after.find("}}")?;
                parts.push(Part::Expr(after[..close].trim().to_string()));
                rest = &after[close + 2..];
            }
        }
    }
}

/// A parsed lookup: which binding, which field.
#[derive(Debug, PartialEq)]
struct Lookup {
    slave: bool,
    field: String,
}

/// Parse `master['x']`, `master.x`, `m.x`, `slave['x']`, `s.x`.
fn parse_lookup(expr: &str) -> Option<Lookup> {
    let (root, accessor) = if let Some(rest) = expr.strip_prefix("master") {
        (false, rest)
    } else if let Some(rest) = expr.strip_prefix("slave") {
        (true, rest)
    } else if let Some(rest) = expr.strip_prefix("m") {
        (false, rest)
    } else if let Some(rest) = expr.strip_prefix("s") {
        (true, rest)
    } else {
        return None;
    };

    let field = if let Some(rest) = accessor.strip_prefix('.') {
        rest.trim().to_string()
    } else if let Some(rest) = accessor.strip_prefix('[') {
        let inner = rest.strip_suffix(']')?.trim();
        inner
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))?
            .to_string()
    } else {
        return None;
    };

    if field.is_empty()
        || !field
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return None;
    }
    Some(Lookup { slave: root, field })
}

fn eval_lookup(expr: &str, master: &Record, slave: Option<&Record>) -> Option<Value> {
    let lookup = parse_lookup(expr)?;
    let record: Option<&Record> = if lookup.slave { slave } else { Some(master) };
    // Missing keys render as empty, matching lenient template engines;
    // only malformed expressions fail the whole evaluation.
    Some(
        record
            .and_then(|r| r.get(&lookup.field))
            .cloned()
            .unwrap_or(Value::String(String::new())),
    )
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Coerce a rendered value back to bool / int / float when the whole
/// string is unambiguously one of those.
fn coerce(value: Value) -> Value {
    let Value::String(s) = value else {
        return value;
    };
    match s.to_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = s.parse::<i64>() {
        return Value::Number(i.into());
    }
    if s.contains('.') {
        if let Ok(f) = s.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    Value::String(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(v: Value) -> Record {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn at_sign_is_master_lookup_sugar() {
        let engine = ExpressionEngine::new();
        let master = record(json!({"title": "New"}));
        assert_eq!(
            engine.evaluate("@title", &master, None),
            Some(json!("New"))
        );
    }

    #[test]
    fn bare_key_resolves_against_master_then_falls_back_to_literal() {
        let engine = ExpressionEngine::new();
        let master = record(json!({"id": 42}));
        assert_eq!(engine.evaluate("id", &master, None), Some(json!(42)));
        assert_eq!(
            engine.evaluate("fixed-value", &master, None),
            Some(json!("fixed-value"))
        );
    }

    #[test]
    fn single_placeholder_preserves_type() {
        let engine = ExpressionEngine::new();
        let master = record(json!({"count": 7, "flag": true}));
        assert_eq!(
            engine.evaluate("{{ master['count'] }}", &master, None),
            Some(json!(7))
        );
        assert_eq!(
            engine.evaluate("{{ m.flag }}", &master, None),
            Some(json!(true))
        );
    }

    #[test]
    fn mixed_template_concatenates_and_coerces() {
        let engine = ExpressionEngine::new();
        let master = record(json!({"major": 1, "minor": 5}));
        assert_eq!(
            engine.evaluate("{{ m.major }}.{{ m.minor }}", &master, None),
            Some(json!(1.5))
        );
    }

    #[test]
    fn slave_alias_reads_the_other_side() {
        let engine = ExpressionEngine::new();
        let master = record(json!({"a": 1}));
        let slave = record(json!({"b": "kept"}));
        assert_eq!(
            engine.evaluate("{{ s.b }}", &master, Some(&slave)),
            Some(json!("kept"))
        );
    }

    #[test]
    fn missing_key_renders_empty() {
        let engine = ExpressionEngine::new();
        let master = record(json!({}));
        assert_eq!(
            engine.evaluate("x={{ m.gone }}", &master, None),
            Some(json!("x="))
        );
    }

    #[test]
    fn syntax_errors_resolve_to_none() {
        let engine = ExpressionEngine::new();
        let master = record(json!({"a": 1}));
        assert_eq!(engine.evaluate("{{ m.a", &master, None), None);
        assert_eq!(engine.evaluate("{{ system('rm') }}", &master, None), None);
        assert!(!engine.validate_syntax("{{ open"));
        assert!(engine.validate_syntax("{{ master['ok'] }}"));
    }

    #[test]
    fn boolean_strings_coerce() {
        let engine = ExpressionEngine::new();
        let master = record(json!({"yes": "TRUE"}));
        assert_eq!(
            engine.evaluate("{{ m.yes }}", &master, None),
            Some(json!(true))
        );
    }
}
