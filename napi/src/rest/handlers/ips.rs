use crate::models::ip::{self, ClaimRequest, IpRecord};
use crate::models::network;
use crate::rest::error::HttpError;
use crate::rest::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

/// The wire shape of an IP record: the stored fields plus a `free` field
/// computed at response time (spec.md §6) — `true` only when the address is
/// neither reserved nor bound to an owner.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct IpResponse {
    #[serde(flatten)]
    pub record: IpRecord,
    pub free: bool,
}

impl From<IpRecord> for IpResponse {
    fn from(record: IpRecord) -> Self {
        let free = record.is_free();
        Self { record, free }
    }
}

#[utoipa::path(get, path = "/networks/{uuid}/ips", responses((status = 200, body = [IpResponse])))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Json<Vec<IpResponse>>, HttpError> {
    let net = network::get(state.kv.as_ref(), &uuid, &state.ctx).await?;
    let bucket = ip::bucket_for(&net.uuid);
    let recs = ip::list(state.kv.as_ref(), &bucket).await?;
    Ok(Json(recs.into_iter().map(IpResponse::from).collect()))
}

#[utoipa::path(get, path = "/networks/{uuid}/ips/{addr}", responses((status = 200, body = IpResponse)))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path((uuid, addr)): Path<(String, IpAddr)>,
) -> Result<Json<IpResponse>, HttpError> {
    let net = network::get(state.kv.as_ref(), &uuid, &state.ctx).await?;
    let bucket = ip::bucket_for(&net.uuid);
    let rec = ip::get(state.kv.as_ref(), &bucket, addr)
        .await?
        .ok_or_else(|| napi_core::error::ApiError::NotFound(format!("ip {addr}")))?;
    Ok(Json(rec.into()))
}

#[derive(Debug, Deserialize)]
pub struct ReserveIp {
    pub reserved: Option<bool>,
    pub belongs_to_uuid: Option<Uuid>,
    pub belongs_to_type: Option<String>,
    pub owner_uuid: Option<Uuid>,
}

/// `PUT /networks/:uuid/ips/:ip` — reserve, free, or rebind a specific
/// address (spec.md §6).
#[utoipa::path(put, path = "/networks/{uuid}/ips/{addr}", responses((status = 200, body = IpResponse)))]
pub async fn put(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((uuid, addr)): Path<(String, IpAddr)>,
    Json(input): Json<ReserveIp>,
) -> Result<Json<IpResponse>, HttpError> {
    let net = network::get(state.kv.as_ref(), &uuid, &state.ctx).await?;
    let bucket = ip::bucket_for(&net.uuid);
    let request_id = super::request_id(&headers);

    if input.belongs_to_uuid.is_none() && input.reserved == Some(false) {
        ip::release(state.kv.as_ref(), &bucket, addr).await?;
        let cleared = IpRecord {
            address: addr,
            reserved: false,
            belongs_to_uuid: None,
            belongs_to_type: None,
            owner_uuid: None,
            etag: String::new(),
        };
        return Ok(Json(cleared.into()));
    }

    let claim = ClaimRequest {
        belongs_to_uuid: input.belongs_to_uuid,
        belongs_to_type: input.belongs_to_type,
        owner_uuid: input.owner_uuid.unwrap_or(state.ctx.admin_uuid),
        reserved: input.reserved.unwrap_or(false),
    };
    let rec = ip::claim_specific(state.kv.as_ref(), &bucket, addr, claim, state.ctx.admin_uuid).await?;
    state.audit.record("ip.put", &request_id, &rec);
    Ok(Json(rec.into()))
}
