//! Maps `ApiError` onto HTTP responses (spec.md §7's "ambient addition").
//! A thin newtype sidesteps the orphan rule — `ApiError` lives in
//! `napi-core`, `IntoResponse` lives in `axum` — the same pairing shape as
//! the teacher's `ApiError`/`From<StoreError>` in `rest/handlers.rs`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use napi_core::error::ApiError;
use serde_json::json;

pub struct HttpError(pub ApiError);

impl From<ApiError> for HttpError {
    fn from(e: ApiError) -> Self {
        HttpError(e)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, code, message, extra) = match &self.0 {
            ApiError::InvalidParameters { message, errors } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "InvalidParameters",
                message.clone(),
                Some(json!({ "errors": errors })),
            ),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, "ResourceNotFound", what.clone(), None),
            ApiError::NotAuthorized => (
                StatusCode::FORBIDDEN,
                "NotAuthorized",
                "not authorized".to_string(),
                None,
            ),
            ApiError::InUse {
                message,
                referenced_by,
            } => (
                StatusCode::CONFLICT,
                "InUse",
                message.clone(),
                Some(json!({ "referenced_by": referenced_by })),
            ),
            ApiError::EtagConflict => (
                StatusCode::PRECONDITION_FAILED,
                "EtagConflict",
                "etag conflict".to_string(),
                None,
            ),
            ApiError::SubnetFull => (
                StatusCode::INSUFFICIENT_STORAGE,
                "SubnetFull",
                "no free ip addresses in the provision range".to_string(),
                None,
            ),
            ApiError::SubnetsExhausted => (
                StatusCode::INSUFFICIENT_STORAGE,
                "SubnetsExhausted",
                "no unallocated subnet space available".to_string(),
                None,
            ),
            ApiError::NetworkOverlap(ids) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "NetworkOverlap",
                "network overlaps existing network(s)".to_string(),
                Some(json!({ "networks": ids })),
            ),
            ApiError::Internal(message) => {
                tracing::error!(%message, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalError",
                    "internal error".to_string(),
                    None,
                )
            }
        };

        let mut body = json!({ "code": code, "message": message });
        if let Some(extra) = extra {
            if let (Some(obj), Some(extra_obj)) = (body.as_object_mut(), extra.as_object()) {
                for (k, v) in extra_obj {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }
        (status, Json(body)).into_response()
    }
}
