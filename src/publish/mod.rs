// Publish pipeline: component-tree transforms, request-spec generation,
// icon pre-rendering, CSS tree-shaking, packaging, and delivery.

pub mod compiler;
pub mod css_bundler;
pub mod css_registry;
pub mod data_request;
pub mod enrichment;
pub mod icons;
pub mod strategy;
pub mod transforms;

pub use compiler::{compile_page, publish_page, PublishContext, PublishOutcome};
pub use strategy::{create_publish_strategy, PublishStrategy};
