// CSS tree-shaking and icon pre-rendering plumbing: bundle content,
// cache behavior, and SVG injection.

use std::collections::{BTreeSet, HashMap};

use frontbase::cache::CacheLayer;
use frontbase::publish::css_bundler::{bundle_css, bundle_css_for_page, collect_component_types};
use frontbase::publish::transforms::{collect_icons, inject_icon_svg};
use frontbase::settings::SettingsHolder;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn bundle_contains_only_used_component_modules() {
    let page = vec![json!({
        "type": "Container",
        "children": [
            {"type": "DataTable"},
            {"type": "Button"}
        ]
    })];
    let mut types = BTreeSet::new();
    collect_component_types(&page, &mut types);

    let bundle = bundle_css(&types);
    assert!(bundle.contains(".fb-datatable"));
    assert!(bundle.contains(".fb-button"));
    assert!(bundle.contains(".fb-container"));
    assert!(!bundle.contains(".fb-form"));
    assert!(!bundle.contains(".fb-hero"));
    // minified: no comments, no double spaces
    assert!(!bundle.contains("/*"));
    assert!(!bundle.contains("  "));
}

#[tokio::test]
async fn identical_pages_hit_the_bundle_cache() {
    let cache = CacheLayer::new(SettingsHolder::new());
    let page = vec![json!({"type": "DataTable"})];

    let first = bundle_css_for_page(&cache, &page).await;
    let second = bundle_css_for_page(&cache, &page).await;
    assert_eq!(first, second);

    // a different component set gets a different bundle
    let other = vec![json!({"type": "Form"})];
    let third = bundle_css_for_page(&cache, &other).await;
    assert_ne!(first, third);
}

#[test]
fn icon_collection_and_injection_round_trip() {
    let tree = json!({
        "type": "Container",
        "children": [
            {"type": "Button", "props": {"icon": "arrow-right", "label": "Go"}},
            {"type": "DataTable", "binding": {
                "frontendFilters": [{"id": "f1", "iconName": "filter"}]
            }}
        ]
    });

    let mut icons = BTreeSet::new();
    collect_icons(&tree, &mut icons);
    assert_eq!(
        icons.iter().cloned().collect::<Vec<_>>(),
        vec!["arrow-right".to_string(), "filter".to_string()]
    );

    let mut svgs = HashMap::new();
    svgs.insert("arrow-right".to_string(), "<svg>arrow</svg>".to_string());
    let injected = inject_icon_svg(&tree, &svgs);
    assert_eq!(
        injected["children"][0]["props"]["iconSvg"],
        json!("<svg>arrow</svg>")
    );
    // unresolved icons stay bare
    assert!(injected["children"][1]["binding"]["frontendFilters"][0]
        .get("iconSvg")
        .is_none());
}
