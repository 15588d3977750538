// Shared component CSS definitions: the single source of truth for
// publish-time bundling. The edge carries a copy as a fallback when a
// bundle is missing.

/// Base styles every published page carries.
pub const GLOBAL_CSS: &str = r#"
:root {
  --fb-font: system-ui, -apple-system, 'Segoe UI', Roboto, sans-serif;
  --fb-text: #18181b;
  --fb-muted: #71717a;
  --fb-border: #e4e4e7;
  --fb-accent: #2563eb;
  --fb-bg: #ffffff;
  --fb-radius: 8px;
}
.fb-page {
  font-family: var(--fb-font);
  color: var(--fb-text);
  background: var(--fb-bg);
  margin: 0;
  line-height: 1.5;
}
.fb-section {
  max-width: 1080px;
  margin: 0 auto;
  padding: 0 16px;
}
.fb-hidden { display: none; }
"#;

/// Per-component CSS modules, keyed by component type.
pub const COMPONENT_CSS: [(&str, &str); 10] = [
    (
        "DataTable",
        r#"
.fb-datatable { width: 100%; border-collapse: collapse; }
.fb-datatable th {
  text-align: left;
  font-weight: 600;
  padding: 10px 12px;
  border-bottom: 2px solid var(--fb-border);
  white-space: nowrap;
}
.fb-datatable td { padding: 10px 12px; border-bottom: 1px solid var(--fb-border); }
.fb-datatable tbody tr:hover { background: #fafafa; }
.fb-datatable .fb-pagination { display: flex; gap: 8px; padding: 12px 0; align-items: center; }
.fb-datatable .fb-pagination button {
  border: 1px solid var(--fb-border);
  background: var(--fb-bg);
  border-radius: var(--fb-radius);
  padding: 4px 10px;
  cursor: pointer;
}
.fb-datatable .fb-pagination button[disabled] { opacity: 0.4; cursor: default; }
"#,
    ),
    (
        "Form",
        r#"
.fb-form { display: grid; gap: 14px; max-width: 560px; }
.fb-form label { font-size: 13px; font-weight: 600; color: var(--fb-muted); }
.fb-form input, .fb-form select, .fb-form textarea {
  border: 1px solid var(--fb-border);
  border-radius: var(--fb-radius);
  padding: 8px 10px;
  font: inherit;
}
.fb-form button[type='submit'] {
  background: var(--fb-accent);
  color: #fff;
  border: 0;
  border-radius: var(--fb-radius);
  padding: 10px 16px;
  cursor: pointer;
}
"#,
    ),
    (
        "InfoList",
        r#"
.fb-infolist { display: grid; gap: 10px; }
.fb-infolist .fb-infolist-row { display: grid; grid-template-columns: 180px 1fr; gap: 12px; }
.fb-infolist .fb-infolist-key { color: var(--fb-muted); font-size: 13px; }
.fb-infolist .fb-infolist-value { word-break: break-word; }
"#,
    ),
    (
        "Text",
        r#"
.fb-text { margin: 0; }
.fb-text.fb-text-muted { color: var(--fb-muted); }
"#,
    ),
    (
        "Heading",
        r#"
.fb-heading { margin: 0 0 0.4em; font-weight: 700; letter-spacing: -0.01em; }
"#,
    ),
    (
        "Button",
        r#"
.fb-button {
  display: inline-flex;
  align-items: center;
  gap: 6px;
  background: var(--fb-accent);
  color: #fff;
  border: 0;
  border-radius: var(--fb-radius);
  padding: 8px 14px;
  cursor: pointer;
  text-decoration: none;
}
.fb-button.fb-button-outline { background: transparent; color: var(--fb-accent); border: 1px solid var(--fb-accent); }
.fb-button svg { width: 1em; height: 1em; }
"#,
    ),
    (
        "Image",
        r#"
.fb-image { max-width: 100%; height: auto; border-radius: var(--fb-radius); }
"#,
    ),
    (
        "Container",
        r#"
.fb-container { display: flex; flex-direction: column; gap: 12px; }
.fb-container.fb-row { flex-direction: row; }
"#,
    ),
    (
        "FilterBar",
        r#"
.fb-filterbar { display: flex; flex-wrap: wrap; gap: 8px; padding: 8px 0; }
.fb-filterbar select, .fb-filterbar input {
  border: 1px solid var(--fb-border);
  border-radius: var(--fb-radius);
  padding: 6px 8px;
  font: inherit;
}
.fb-filterbar .fb-filter-chip {
  display: inline-flex;
  align-items: center;
  gap: 4px;
  background: #f4f4f5;
  border-radius: 999px;
  padding: 2px 10px;
  font-size: 13px;
}
"#,
    ),
    (
        "Hero",
        r#"
.fb-hero { padding: 64px 16px; text-align: center; }
.fb-hero .fb-hero-title { font-size: 40px; margin: 0 0 12px; }
.fb-hero .fb-hero-subtitle { color: var(--fb-muted); font-size: 18px; margin: 0 0 24px; }
"#,
    ),
];

/// CSS module for a component type, if registered.
pub fn css_for_component(component_type: &str) -> Option<&'static str> {
    COMPONENT_CSS
        .iter()
        .find(|(name, _)| *name == component_type)
        .map(|(_, css)| *css)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_components_have_css() {
        assert!(css_for_component("DataTable").unwrap().contains(".fb-datatable"));
        assert!(css_for_component("Form").is_some());
        assert!(css_for_component("Unknown").is_none());
    }
}
