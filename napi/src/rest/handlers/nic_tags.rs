use crate::events::{ChangeEvent, ChangeKind, Resource};
use crate::models::nic_tag::{self, CreateNicTag, NicTag, UpdateNicTag};
use crate::rest::error::HttpError;
use crate::rest::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use std::sync::Arc;

#[utoipa::path(get, path = "/nic_tags", responses((status = 200, body = [NicTag])))]
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<NicTag>>, HttpError> {
    Ok(Json(nic_tag::list(state.kv.as_ref()).await?))
}

#[utoipa::path(post, path = "/nic_tags", responses((status = 200, body = NicTag)))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(input): Json<CreateNicTag>,
) -> Result<Json<NicTag>, HttpError> {
    let request_id = super::request_id(&headers);
    let tag = nic_tag::create(state.kv.as_ref(), input).await?;
    state.audit.record("nic_tag.create", &request_id, &tag);
    crate::events::publish(
        &state.events_tx,
        ChangeEvent {
            kind: ChangeKind::Created,
            resource: Resource::NicTag,
            id: tag.name.clone(),
        },
    );
    Ok(Json(tag))
}

#[utoipa::path(get, path = "/nic_tags/{name}", responses((status = 200, body = NicTag)))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<NicTag>, HttpError> {
    Ok(Json(nic_tag::get(state.kv.as_ref(), &name).await?))
}

#[utoipa::path(put, path = "/nic_tags/{name}", responses((status = 200, body = NicTag)))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(input): Json<UpdateNicTag>,
) -> Result<Json<NicTag>, HttpError> {
    let request_id = super::request_id(&headers);
    let tag = nic_tag::update(state.kv.as_ref(), &name, input).await?;
    state.audit.record("nic_tag.update", &request_id, &tag);
    crate::events::publish(
        &state.events_tx,
        ChangeEvent {
            kind: ChangeKind::Updated,
            resource: Resource::NicTag,
            id: tag.name.clone(),
        },
    );
    Ok(Json(tag))
}

#[utoipa::path(delete, path = "/nic_tags/{name}", responses((status = 204)))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<axum::http::StatusCode, HttpError> {
    let request_id = super::request_id(&headers);
    nic_tag::delete(state.kv.as_ref(), &name).await?;
    state.audit.record("nic_tag.delete", &request_id, &name);
    crate::events::publish(
        &state.events_tx,
        ChangeEvent {
            kind: ChangeKind::Deleted,
            resource: Resource::NicTag,
            id: name,
        },
    );
    Ok(axum::http::StatusCode::NO_CONTENT)
}
