// Page publish trigger plus the public endpoints the edge pulls from.
// Page authoring CRUD lives outside the core.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::json;
use tracing::info;

use crate::http_server::AppState;
use crate::http_types::{ok, ApiError, ApiResult};
use crate::observability::with_trace_id;
use crate::publish::compiler::{
    load_bundle_inputs, publish_page as run_publish, serialize_page_for_edge,
};

/// Compile and deliver a page. Returns the preview URL and new version
/// on success; on edge failure the page is NOT flipped public and the
/// status reflects the upstream outcome (502/503/504).
pub async fn publish_page(State(state): State<AppState>, Path(page_id): Path<String>) -> ApiResult {
    with_trace_id("publish_page", async move {
        info!("Publish requested for page {page_id}");
        let outcome = run_publish(&state.publish_ctx(), &page_id).await?;
        Ok((
            StatusCode::OK,
            Json(json!({
                "success": outcome.success,
                "message": outcome.message,
                "previewUrl": outcome.preview_url,
                "version": outcome.version,
            })),
        ))
    })
    .await
}

/// Live compiled page for SSR. Runs the same enrichment path as a
/// publish so the edge always gets fresh request specs.
pub async fn get_public_page(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult {
    let page = state
        .store
        .get_page_by_slug(&slug)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("page {slug}")))?;

    let inputs = load_bundle_inputs(&state.publish_ctx(), &page.id).await?;
    let payload = serialize_page_for_edge(&inputs.page, &inputs.datasources, &inputs.schema_index);
    Ok(ok(payload))
}

/// The homepage for edge pull-publish, served when the edge has no
/// local copy yet.
pub async fn get_homepage(State(state): State<AppState>) -> ApiResult {
    let page = state
        .store
        .get_homepage()
        .await?
        .ok_or_else(|| ApiError::not_found("homepage"))?;

    let inputs = load_bundle_inputs(&state.publish_ctx(), &page.id).await?;
    let payload = serialize_page_for_edge(&inputs.page, &inputs.datasources, &inputs.schema_index);
    Ok(ok(payload))
}
