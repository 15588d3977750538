// Shared HTTP response types: the `{success, data?, message?, error?,
// details?}` envelope and the error-to-status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::errors::FrontbaseError;

/// Success envelope with a payload.
pub fn ok(data: Value) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({"success": true, "data": data})))
}

/// Success envelope for creations.
pub fn created(data: Value) -> (StatusCode, Json<Value>) {
    (
        StatusCode::CREATED,
        Json(json!({"success": true, "data": data})),
    )
}

/// Success envelope with a human message instead of a payload.
pub fn message(text: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({"success": true, "message": text.into()})),
    )
}

/// Handler error that renders the failure envelope with the taxonomy's
/// status code.
pub struct ApiError(pub FrontbaseError);

impl From<FrontbaseError> for ApiError {
    fn from(e: FrontbaseError) -> Self {
        ApiError(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        // An anyhow chain that wraps a classified error keeps its class.
        match e.downcast::<FrontbaseError>() {
            Ok(classified) => ApiError(classified),
            Err(other) => ApiError(FrontbaseError::Fatal(other)),
        }
    }
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError(FrontbaseError::Validation(message.into()))
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        ApiError(FrontbaseError::NotFound(entity.into()))
    }
}

pub fn error_status(e: &FrontbaseError) -> StatusCode {
    match e {
        FrontbaseError::Validation(_) => StatusCode::BAD_REQUEST,
        FrontbaseError::NotFound(_) => StatusCode::NOT_FOUND,
        FrontbaseError::Connection { .. } => StatusCode::BAD_GATEWAY,
        FrontbaseError::UpstreamHttp { .. } => StatusCode::BAD_GATEWAY,
        FrontbaseError::UpstreamUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
        FrontbaseError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        FrontbaseError::ConflictRequiresManualResolution { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        FrontbaseError::SchemaLookupMiss { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        FrontbaseError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = error_status(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {:#}", self.0.to_fatal());
            return (
                status,
                Json(json!({"success": false, "error": "internal server error"})),
            )
                .into_response();
        }

        let mut body = json!({"success": false, "error": self.0.to_string()});
        match &self.0 {
            FrontbaseError::Connection { .. } => {
                if let Some(suggestion) = self.0.suggestion() {
                    body["details"] = Value::String(suggestion.to_string());
                }
            }
            FrontbaseError::UpstreamHttp { body: upstream, .. } => {
                body["details"] = Value::String(upstream.chars().take(500).collect());
            }
            _ => {}
        }
        warn!("request failed with {status}: {}", self.0);
        (status, Json(body)).into_response()
    }
}

impl FrontbaseError {
    /// Collapse into an anyhow error for logging; keeps the chain.
    fn to_fatal(self) -> anyhow::Error {
        match self {
            FrontbaseError::Fatal(e) => e,
            other => anyhow::Error::msg(other.to_string()),
        }
    }
}

/// Convenience alias used by every handler.
pub type ApiResult = Result<(StatusCode, Json<Value>), ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_contract_statuses() {
        assert_eq!(
            error_status(&FrontbaseError::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&FrontbaseError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_status(&FrontbaseError::UpstreamHttp {
                status: 500,
                body: "".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_status(&FrontbaseError::UpstreamUnreachable("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            error_status(&FrontbaseError::UpstreamTimeout("x".into())),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            error_status(&FrontbaseError::Fatal(anyhow::anyhow!("boom"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
