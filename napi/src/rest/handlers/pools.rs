use crate::events::{ChangeEvent, ChangeKind, Resource};
use crate::models::nic::{CreateNic, Nic};
use crate::models::pool::{self, CreatePool, NetworkPool, UpdatePool};
use crate::rest::error::HttpError;
use crate::rest::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use std::sync::Arc;

#[utoipa::path(get, path = "/network_pools", responses((status = 200, body = [NetworkPool])))]
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<NetworkPool>>, HttpError> {
    Ok(Json(pool::list(state.kv.as_ref()).await?))
}

#[utoipa::path(post, path = "/network_pools", responses((status = 200, body = NetworkPool)))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(input): Json<CreatePool>,
) -> Result<Json<NetworkPool>, HttpError> {
    let request_id = super::request_id(&headers);
    let created = pool::create(state.kv.as_ref(), input).await?;
    state.audit.record("network_pool.create", &request_id, &created);
    crate::events::publish(
        &state.events_tx,
        ChangeEvent {
            kind: ChangeKind::Created,
            resource: Resource::Pool,
            id: created.uuid.to_string(),
        },
    );
    Ok(Json(created))
}

#[utoipa::path(get, path = "/network_pools/{uuid}", responses((status = 200, body = NetworkPool)))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Json<NetworkPool>, HttpError> {
    Ok(Json(pool::get(state.kv.as_ref(), &uuid).await?))
}

#[utoipa::path(put, path = "/network_pools/{uuid}", responses((status = 200, body = NetworkPool)))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(uuid): Path<String>,
    Json(input): Json<UpdatePool>,
) -> Result<Json<NetworkPool>, HttpError> {
    let request_id = super::request_id(&headers);
    let updated = pool::update(state.kv.as_ref(), &uuid, input).await?;
    state.audit.record("network_pool.update", &request_id, &updated);
    crate::events::publish(
        &state.events_tx,
        ChangeEvent {
            kind: ChangeKind::Updated,
            resource: Resource::Pool,
            id: updated.uuid.to_string(),
        },
    );
    Ok(Json(updated))
}

#[utoipa::path(delete, path = "/network_pools/{uuid}", responses((status = 204)))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(uuid): Path<String>,
) -> Result<axum::http::StatusCode, HttpError> {
    let request_id = super::request_id(&headers);
    pool::delete(state.kv.as_ref(), &uuid).await?;
    state.audit.record("network_pool.delete", &request_id, &uuid);
    crate::events::publish(
        &state.events_tx,
        ChangeEvent {
            kind: ChangeKind::Deleted,
            resource: Resource::Pool,
            id: uuid,
        },
    );
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// `POST /network_pools/:uuid/nics` — provision a NIC in a pool (spec.md
/// §4.7 "Provisioning variants").
#[utoipa::path(post, path = "/network_pools/{uuid}/nics", responses((status = 200, body = Nic)))]
pub async fn provision_nic(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(uuid): Path<String>,
    Json(input): Json<CreateNic>,
) -> Result<Json<Nic>, HttpError> {
    let request_id = super::request_id(&headers);
    let pool = pool::get(state.kv.as_ref(), &uuid).await?;
    let deps = state.nic_deps();
    let nic = crate::models::nic::create_in_pool(state.kv.as_ref(), &deps, &pool, input).await?;
    state.audit.record("nic.provision_in_pool", &request_id, &nic);
    crate::events::publish(
        &state.events_tx,
        ChangeEvent {
            kind: ChangeKind::Created,
            resource: Resource::Nic,
            id: nic.mac.to_string(),
        },
    );
    Ok(Json(nic))
}
