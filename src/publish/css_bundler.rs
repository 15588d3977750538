// Tree-shaken CSS bundling: the global base plus modules for exactly
// the component types present on the page, minified, cached by the
// sorted type set.

use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, instrument};

use crate::cache::CacheLayer;

use super::css_registry::{css_for_component, GLOBAL_CSS};

/// Collect every component `type` present in the tree.
pub fn collect_component_types(components: &[Value], types: &mut BTreeSet<String>) {
    for component in components {
        if let Some(t) = component.get("type").and_then(Value::as_str) {
            types.insert(t.to_string());
        }
        if let Some(children) = component.get("children").and_then(Value::as_array) {
            collect_component_types(children, types);
        }
    }
}

/// Build the minified bundle for a set of component types.
pub fn bundle_css(types: &BTreeSet<String>) -> String {
    let mut css = String::from(GLOBAL_CSS);
    for component_type in types {
        if let Some(module) = css_for_component(component_type) {
            css.push_str(module);
        }
    }
    minify(&css)
}

/// Bundle with a two-tier cache keyed on the type set.
#[instrument(skip(cache, components))]
pub async fn bundle_css_for_page(cache: &CacheLayer, components: &[Value]) -> String {
    let mut types = BTreeSet::new();
    collect_component_types(components, &mut types);

    let type_list = types.iter().cloned().collect::<Vec<_>>().join(",");
    let key = format!("css:{:x}", md5::compute(type_list.as_bytes()));

    if let Some(Value::String(cached)) = cache.get(&key).await {
        debug!("css bundle cache hit for [{type_list}]");
        return cached;
    }

    let bundle = bundle_css(&types);
    cache
        .set(&key, Value::String(bundle.clone()), cache.ttl_count())
        .await;
    bundle
}

/// Whitespace-and-comment minifier. Keeps declarations intact; good
/// enough for the small registry modules this bundles.
fn minify(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut chars = css.chars().peekable();
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            c if c.is_whitespace() => {
                pending_space = true;
            }
            c => {
                if pending_space {
                    let boundary = matches!(c, '{' | '}' | ':' | ';' | ',' | '>')
                        || matches!(out.chars().last(), Some('{' | '}' | ':' | ';' | ',' | '>'))
                        || out.is_empty();
                    if !boundary {
                        out.push(' ');
                    }
                    pending_space = false;
                }
                out.push(c);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_used_component_modules_are_bundled() {
        let mut types = BTreeSet::new();
        types.insert("DataTable".to_string());
        let bundle = bundle_css(&types);
        assert!(bundle.contains(".fb-datatable"));
        assert!(!bundle.contains(".fb-form"));
        // global base always ships
        assert!(bundle.contains(".fb-page"));
    }

    #[test]
    fn types_collected_recursively() {
        let components = vec![json!({
            "type": "Container",
            "children": [
                {"type": "DataTable"},
                {"type": "Container", "children": [{"type": "Button"}]}
            ]
        })];
        let mut types = BTreeSet::new();
        collect_component_types(&components, &mut types);
        let collected: Vec<&str> = types.iter().map(String::as_str).collect();
        assert_eq!(collected, vec!["Button", "Container", "DataTable"]);
    }

    #[test]
    fn minify_strips_comments_and_collapses_whitespace() {
        let css = "/* comment */ .a {\n  color: red;\n}\n.b > .c { margin: 0 auto; }";
        let min = minify(css);
        assert!(!min.contains("comment"));
        assert!(min.contains(".a{color:red;}"));
        assert!(min.contains("margin:0 auto;"));
    }

    #[test]
    fn unknown_types_do_not_break_bundling() {
        let mut types = BTreeSet::new();
        types.insert("Bogus".to_string());
        let bundle = bundle_css(&types);
        assert!(bundle.contains(".fb-page"));
    }
}
