use crate::events::{ChangeEvent, ChangeKind, Resource};
use crate::models::network::{self, CreateNetwork, ListFilter, Network, UpdateNetwork};
use crate::rest::error::HttpError;
use crate::rest::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct NetworkQuery {
    pub name: Option<String>,
    pub nic_tag: Option<String>,
    pub vlan_id: Option<u16>,
    pub family: Option<napi_core::Family>,
    pub owner_uuid: Option<Uuid>,
    pub fabric: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl From<NetworkQuery> for ListFilter {
    fn from(q: NetworkQuery) -> Self {
        ListFilter {
            name: q.name,
            nic_tag: q.nic_tag,
            vlan_id: q.vlan_id,
            family: q.family,
            owner_uuid: q.owner_uuid,
            fabric: q.fabric,
            limit: q.limit,
            offset: q.offset.unwrap_or(0),
        }
    }
}

#[utoipa::path(get, path = "/networks", responses((status = 200, body = [Network])))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NetworkQuery>,
) -> Result<Json<Vec<Network>>, HttpError> {
    Ok(Json(network::list(state.kv.as_ref(), query.into()).await?))
}

#[utoipa::path(post, path = "/networks", responses((status = 200, body = Network)))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(input): Json<CreateNetwork>,
) -> Result<Json<Network>, HttpError> {
    let request_id = super::request_id(&headers);
    let net = network::create(state.kv.as_ref(), &state.ctx, input).await?;
    state.audit.record("network.create", &request_id, &net);
    crate::events::publish(
        &state.events_tx,
        ChangeEvent {
            kind: ChangeKind::Created,
            resource: Resource::Network,
            id: net.uuid.to_string(),
        },
    );
    Ok(Json(net))
}

#[utoipa::path(get, path = "/networks/{uuid}", responses((status = 200, body = Network)))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Json<Network>, HttpError> {
    Ok(Json(network::get(state.kv.as_ref(), &uuid, &state.ctx).await?))
}

#[utoipa::path(put, path = "/networks/{uuid}", responses((status = 200, body = Network)))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(uuid): Path<String>,
    Json(input): Json<UpdateNetwork>,
) -> Result<Json<Network>, HttpError> {
    let request_id = super::request_id(&headers);
    let net = network::update(state.kv.as_ref(), &uuid, &state.ctx, input).await?;
    state.audit.record("network.update", &request_id, &net);
    crate::events::publish(
        &state.events_tx,
        ChangeEvent {
            kind: ChangeKind::Updated,
            resource: Resource::Network,
            id: net.uuid.to_string(),
        },
    );
    Ok(Json(net))
}

#[utoipa::path(delete, path = "/networks/{uuid}", responses((status = 204)))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(uuid): Path<String>,
) -> Result<axum::http::StatusCode, HttpError> {
    let request_id = super::request_id(&headers);
    network::delete(state.kv.as_ref(), &uuid, &state.ctx).await?;
    state.audit.record("network.delete", &request_id, &uuid);
    crate::events::publish(
        &state.events_tx,
        ChangeEvent {
            kind: ChangeKind::Deleted,
            resource: Resource::Network,
            id: uuid,
        },
    );
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// `POST /networks/:uuid/nics` — provision a NIC on this network (spec.md
/// §4.7 "Provisioning variants").
#[utoipa::path(post, path = "/networks/{uuid}/nics", responses((status = 200, body = crate::models::nic::Nic)))]
pub async fn provision_nic(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(uuid): Path<String>,
    Json(mut input): Json<crate::models::nic::CreateNic>,
) -> Result<Json<crate::models::nic::Nic>, HttpError> {
    input.network_uuid = Some(uuid);
    let request_id = super::request_id(&headers);
    let deps = state.nic_deps();
    let nic = crate::models::nic::create(state.kv.as_ref(), &deps, input).await?;
    state.audit.record("nic.provision", &request_id, &nic);
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
