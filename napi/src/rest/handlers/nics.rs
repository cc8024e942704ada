use crate::events::{ChangeEvent, ChangeKind, Resource};
use crate::models::nic::{self, CreateNic, Nic, NicListFilter, UpdateNic};
use crate::rest::error::HttpError;
use crate::rest::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct NicQuery {
    pub belongs_to_uuid: Option<Uuid>,
    pub owner_uuid: Option<Uuid>,
    pub network_uuid: Option<Uuid>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl From<NicQuery> for NicListFilter {
    fn from(q: NicQuery) -> Self {
        NicListFilter {
            belongs_to_uuid: q.belongs_to_uuid,
            owner_uuid: q.owner_uuid,
            network_uuid: q.network_uuid,
            limit: q.limit,
            offset: q.offset.unwrap_or(0),
        }
    }
}

#[utoipa::path(get, path = "/nics", responses((status = 200, body = [Nic])))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NicQuery>,
) -> Result<Json<Vec<Nic>>, HttpError> {
    Ok(Json(nic::list(state.kv.as_ref(), query.into()).await?))
}

#[utoipa::path(post, path = "/nics", responses((status = 200, body = Nic)))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(input): Json<CreateNic>,
) -> Result<Json<Nic>, HttpError> {
    let request_id = super::request_id(&headers);
    let deps = state.nic_deps();
    let created = nic::create(state.kv.as_ref(), &deps, input).await?;
    state.audit.record("nic.create", &request_id, &created);
    crate::events::publish(
        &state.events_tx,
        ChangeEvent {
            kind: ChangeKind::Created,
            resource: Resource::Nic,
            id: created.mac.to_string(),
        },
    );
    Ok(Json(created))
}

#[utoipa::path(get, path = "/nics/{mac}", responses((status = 200, body = Nic)))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(mac): Path<String>,
) -> Result<Json<Nic>, HttpError> {
    Ok(Json(nic::get(state.kv.as_ref(), &mac).await?))
}

#[utoipa::path(put, path = "/nics/{mac}", responses((status = 200, body = Nic)))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(mac): Path<String>,
    Json(input): Json<UpdateNic>,
) -> Result<Json<Nic>, HttpError> {
    let request_id = super::request_id(&headers);
    let deps = state.nic_deps();
    let updated = nic::update(state.kv.as_ref(), &deps, &mac, input).await?;
    state.audit.record("nic.update", &request_id, &updated);
    crate::events::publish(
        &state.events_tx,
        ChangeEvent {
            kind: ChangeKind::Updated,
            resource: Resource::Nic,
            id: updated.mac.to_string(),
        },
    );
    Ok(Json(updated))
}

#[utoipa::path(delete, path = "/nics/{mac}", responses((status = 204)))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(mac): Path<String>,
) -> Result<axum::http::StatusCode, HttpError> {
    let request_id = super::request_id(&headers);
    let deps = state.nic_deps();
    nic::delete(state.kv.as_ref(), &deps, &mac).await?;
    state.audit.record("nic.delete", &request_id, &mac);
    crate::events::publish(
        &state.events_tx,
        ChangeEvent {
            kind: ChangeKind::Deleted,
            resource: Resource::Nic,
            id: mac,
        },
    );
    Ok(axum::http::StatusCode::NO_CONTENT)
}
