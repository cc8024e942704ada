//! NIC model (spec.md §4.7): creation, update, deletion of a NIC, which
//! atomically binds or releases an IP, enforces primary/underlay
//! uniqueness, and emits overlay/underlay mapping side effects.

use crate::kv::{BatchOp, EtagCondition, Filter, FindOptions, KvStore};
use crate::models::ip::{self, ClaimRequest};
use crate::models::network::Network;
use crate::models::NICS_BUCKET;
use crate::overlay::{OverlayMapping, OverlayMappingSink, ShootdownSink, UnderlayMapping};
use chrono::{DateTime, Utc};
use napi_core::error::{ApiError, FieldError, FieldErrorCode, ValidationErrors};
use napi_core::validate;
use napi_core::Result;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BelongsToType {
    Zone,
    Server,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NicState {
    Provisioning,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Nic {
    pub mac: u64,
    pub owner_uuid: Uuid,
    pub belongs_to_uuid: Uuid,
    pub belongs_to_type: BelongsToType,
    pub state: NicState,
    #[serde(default)]
    pub primary: bool,
    pub model: Option<String>,
    pub nic_tag: Option<String>,
    #[serde(default)]
    pub nic_tags_provided: Vec<String>,
    #[schema(value_type = Option<String>)]
    pub ip: Option<IpAddr>,
    pub network_uuid: Option<Uuid>,
    pub cn_uuid: Option<Uuid>,
    #[serde(default)]
    pub underlay: bool,
    pub allow_ip_spoofing: Option<bool>,
    pub allow_mac_spoofing: Option<bool>,
    pub allow_dhcp_spoofing: Option<bool>,
    pub allow_restricted_traffic: Option<bool>,
    pub allow_unfiltered_promisc: Option<bool>,
    pub created_ts: DateTime<Utc>,
    pub modified_ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
}

impl Nic {
    pub fn is_bound(&self) -> bool {
        self.ip.is_some() && self.network_uuid.is_some()
    }

    pub fn is_fabric_nic(&self, net: Option<&Network>) -> bool {
        self.belongs_to_type == BelongsToType::Zone
            && self.cn_uuid.is_some()
            && net.is_some_and(|n| n.fabric)
    }

    pub fn is_underlay_nic(&self, underlay_tag: &str) -> bool {
        self.belongs_to_type == BelongsToType::Server
            && self.underlay
            && self.nic_tag.as_deref() == Some(underlay_tag)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateNic {
    pub mac: Option<String>,
    pub owner_uuid: Option<String>,
    pub belongs_to_uuid: Option<String>,
    pub belongs_to_type: Option<BelongsToType>,
    pub ip: Option<String>,
    pub network_uuid: Option<String>,
    #[serde(default)]
    pub primary: bool,
    pub state: Option<NicState>,
    pub nic_tag: Option<String>,
    #[serde(default)]
    pub nic_tags_provided: Vec<String>,
    pub cn_uuid: Option<String>,
    #[serde(default)]
    pub underlay: bool,
    pub model: Option<String>,
    pub allow_ip_spoofing: Option<bool>,
    pub allow_mac_spoofing: Option<bool>,
    pub allow_dhcp_spoofing: Option<bool>,
    pub allow_restricted_traffic: Option<bool>,
    pub allow_unfiltered_promisc: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateNic {
    pub owner_uuid: Option<String>,
    pub belongs_to_uuid: Option<String>,
    pub belongs_to_type: Option<BelongsToType>,
    pub state: Option<NicState>,
    pub primary: Option<bool>,
    pub nic_tag: Option<String>,
    pub nic_tags_provided: Option<Vec<String>>,
    pub cn_uuid: Option<String>,
    pub underlay: Option<bool>,
    pub ip: Option<String>,
    pub network_uuid: Option<String>,
    pub allow_ip_spoofing: Option<bool>,
    pub allow_mac_spoofing: Option<bool>,
    pub allow_dhcp_spoofing: Option<bool>,
    pub allow_restricted_traffic: Option<bool>,
    pub allow_unfiltered_promisc: Option<bool>,
}

/// Dependencies a NIC mutation needs beyond the KV store: the configured
/// underlay tag name and the two side-effect sinks (spec.md §4.8).
pub struct NicDeps<'a> {
    pub underlay_tag: &'a str,
    pub overlay: &'a dyn OverlayMappingSink,
    pub shootdown: &'a dyn ShootdownSink,
    pub admin_uuid: Uuid,
}

fn from_value(value: serde_json::Value, etag: String) -> Result<Nic> {
    let mut nic: Nic = serde_json::from_value(value)
        .map_err(|e| ApiError::Internal(format!("corrupt nic: {e}")))?;
    nic.etag = etag;
    Ok(nic)
}

fn parse_mac(errors: &mut ValidationErrors, field: &str, raw: &str) -> Option<u64> {
    let cleaned: String = raw.chars().filter(|c| *c != ':' && *c != '-').collect();
    let parsed = if cleaned.chars().all(|c| c.is_ascii_hexdigit()) && raw.contains([':', '-']) {
        u64::from_str_radix(&cleaned, 16).ok()
    } else {
        raw.parse::<u64>().ok()
    };
    match parsed {
        Some(mac) if mac <= 0xFFFF_FFFF_FFFF => Some(mac),
        _ => {
            errors.push(
                FieldError::new(field, FieldErrorCode::InvalidParameter, "must be a valid 48-bit MAC address")
                    .with_invalid(raw),
            );
            None
        }
    }
}

async fn fetch_network(kv: &dyn KvStore, uuid: &Uuid) -> Result<Network> {
    match kv.get(crate::models::NETWORKS_BUCKET, &uuid.to_string()).await {
        Ok(rec) => {
            let mut n: Network =
                serde_json::from_value(rec.value).map_err(|e| ApiError::Internal(e.to_string()))?;
            n.etag = rec.etag;
            Ok(n)
        }
        Err(_) => Err(ApiError::invalid_param("network_uuid", "no such network")),
    }
}

async fn demote_other_primaries(kv: &dyn KvStore, belongs_to_uuid: &Uuid, except_mac: Option<u64>) -> Result<Vec<BatchOp>> {
    let rows = kv
        .find(
            NICS_BUCKET,
            Filter::And(vec![
                Filter::Eq("belongs_to_uuid".to_string(), serde_json::json!(belongs_to_uuid)),
                Filter::Eq("primary".to_string(), serde_json::json!(true)),
            ]),
            FindOptions::default(),
        )
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut ops = Vec::new();
    for (key, rec) in rows {
        if Some(key.parse::<u64>().unwrap_or_default()) == except_mac {
            continue;
        }
        let mut nic = from_value(rec.value, rec.etag)?;
        nic.primary = false;
        let value = serde_json::to_value(&nic).unwrap();
        ops.push(BatchOp::Put {
            bucket: NICS_BUCKET.to_string(),
            key,
            value,
            cond: EtagCondition::MustMatch(nic.etag),
            unique_fields: vec![],
        });
    }
    Ok(ops)
}

pub async fn create(
    kv: &dyn KvStore,
    deps: &NicDeps<'_>,
    input: CreateNic,
) -> Result<Nic> {
    let mut errors = ValidationErrors::new();
    let mac = match &input.mac {
        Some(raw) => parse_mac(&mut errors, "mac", raw),
        None => Some(rand::random::<u64>() & 0xFFFF_FFFF_FFFF),
    };
    let owner_uuid = validate::require(&mut errors, "owner_uuid", input.owner_uuid.as_ref())
        .and_then(|raw| validate::parse_uuid(&mut errors, "owner_uuid", raw));
    let belongs_to_uuid = validate::require(&mut errors, "belongs_to_uuid", input.belongs_to_uuid.as_ref())
        .and_then(|raw| validate::parse_uuid(&mut errors, "belongs_to_uuid", raw));
    let belongs_to_type = validate::require(&mut errors, "belongs_to_type", input.belongs_to_type.as_ref()).copied();
    let network_uuid = input
        .network_uuid
        .as_ref()
        .and_then(|raw| validate::parse_uuid(&mut errors, "network_uuid", raw));
    let ip_addr = input
        .ip
        .as_ref()
        .and_then(|raw| validate::parse_ip(&mut errors, "ip", raw));
    let cn_uuid = input
        .cn_uuid
        .as_ref()
        .and_then(|raw| validate::parse_uuid(&mut errors, "cn_uuid", raw));

    if input.underlay && input.nic_tag.as_deref() == Some(deps.underlay_tag) {
        // underlay NICs are server-only (spec.md §4.7 supplement).
        if belongs_to_type != Some(BelongsToType::Server) {
            errors.push(FieldError::new(
                "underlay",
                FieldErrorCode::InvalidParameter,
                "underlay nics must have belongs_to_type=server",
            ));
        }
    }
    errors.into_result()?;

    let (mac, owner_uuid, belongs_to_uuid, belongs_to_type) = (
        mac.unwrap(),
        owner_uuid.unwrap(),
        belongs_to_uuid.unwrap(),
        belongs_to_type.unwrap(),
    );

    let network = match network_uuid {
        Some(id) => Some(fetch_network(kv, &id).await?),
        None => None,
    };

    if let Some(net) = &network {
        if net.fabric && !input.underlay && input.nic_tag.as_deref() == Some(deps.underlay_tag) {
            return Err(ApiError::invalid_param(
                "nic_tag",
                "the underlay tag cannot host a fabric network nic",
            ));
        }
    }

    let now = Utc::now();
    let mut nic = Nic {
        mac,
        owner_uuid,
        belongs_to_uuid,
        belongs_to_type,
        state: input.state.unwrap_or(NicState::Running),
        primary: input.primary,
        model: input.model,
        nic_tag: input.nic_tag.clone(),
        nic_tags_provided: input.nic_tags_provided,
        ip: None,
        network_uuid,
        cn_uuid,
        underlay: input.underlay,
        allow_ip_spoofing: input.allow_ip_spoofing,
        allow_mac_spoofing: input.allow_mac_spoofing,
        allow_dhcp_spoofing: input.allow_dhcp_spoofing,
        allow_restricted_traffic: input.allow_restricted_traffic,
        allow_unfiltered_promisc: input.allow_unfiltered_promisc,
        created_ts: now,
        modified_ts: now,
        etag: String::new(),
    };

    if let Some(net) = &network {
        let claim = ClaimRequest {
            belongs_to_uuid: Some(belongs_to_uuid),
            belongs_to_type: Some(format!("{belongs_to_type:?}").to_lowercase()),
            owner_uuid,
            reserved: false,
        };
        let rec = crate::models::network::claim_provisioned_ip(kv, net, ip_addr, claim, deps.admin_uuid).await?;
        nic.ip = Some(rec.address);
    }

    let mut ops = Vec::new();
    if nic.primary {
        ops.extend(demote_other_primaries(kv, &belongs_to_uuid, Some(mac)).await?);
    }

    let value = serde_json::to_value(&nic).unwrap();
    ops.push(BatchOp::Put {
        bucket: NICS_BUCKET.to_string(),
        key: mac.to_string(),
        value,
        cond: EtagCondition::MustNotExist,
        unique_fields: vec![],
    });

    if let Err(e) = kv.batch(ops).await {
        if let Some(addr) = nic.ip {
            if let Some(net) = &network {
                let _ = ip::release(kv, &ip::bucket_for(&net.uuid), addr).await;
            }
        }
        return Err(match e {
            crate::kv::KvError::EtagConflict => ApiError::EtagConflict,
            other => ApiError::Internal(other.to_string()),
        });
    }

    emit_side_effects(deps, &nic, network.as_ref()).await;
    get(kv, &mac.to_string()).await
}

/// `POST /network_pools/:uuid/nics` — provision a NIC in a pool (spec.md
/// §4.7 "Provisioning variants"): try member networks in stable order until
/// one yields an address, then commit the NIC the same way `create` does.
pub async fn create_in_pool(
    kv: &dyn KvStore,
    deps: &NicDeps<'_>,
    pool: &crate::models::pool::NetworkPool,
    input: CreateNic,
) -> Result<Nic> {
    if input.network_uuid.is_some() || input.ip.is_some() {
        return Err(ApiError::invalid_param(
            "network_uuid",
            "must not be set when provisioning through a pool",
        ));
    }

    let mut errors = ValidationErrors::new();
    let mac = match &input.mac {
        Some(raw) => parse_mac(&mut errors, "mac", raw),
        None => Some(rand::random::<u64>() & 0xFFFF_FFFF_FFFF),
    };
    let owner_uuid = validate::require(&mut errors, "owner_uuid", input.owner_uuid.as_ref())
        .and_then(|raw| validate::parse_uuid(&mut errors, "owner_uuid", raw));
    let belongs_to_uuid = validate::require(&mut errors, "belongs_to_uuid", input.belongs_to_uuid.as_ref())
        .and_then(|raw| validate::parse_uuid(&mut errors, "belongs_to_uuid", raw));
    let belongs_to_type = validate::require(&mut errors, "belongs_to_type", input.belongs_to_type.as_ref()).copied();
    let cn_uuid = input
        .cn_uuid
        .as_ref()
        .and_then(|raw| validate::parse_uuid(&mut errors, "cn_uuid", raw));

    if input.underlay && input.nic_tag.as_deref() == Some(deps.underlay_tag) && belongs_to_type != Some(BelongsToType::Server) {
        errors.push(FieldError::new(
            "underlay",
            FieldErrorCode::InvalidParameter,
            "underlay nics must have belongs_to_type=server",
        ));
    }
    errors.into_result()?;

    let (mac, owner_uuid, belongs_to_uuid, belongs_to_type) = (
        mac.unwrap(),
        owner_uuid.unwrap(),
        belongs_to_uuid.unwrap(),
        belongs_to_type.unwrap(),
    );

    let claim = ClaimRequest {
        belongs_to_uuid: Some(belongs_to_uuid),
        belongs_to_type: Some(format!("{belongs_to_type:?}").to_lowercase()),
        owner_uuid,
        reserved: false,
    };
    let (net, rec) = crate::models::pool::provision_in_pool(kv, pool, claim).await?;

    if net.fabric && !input.underlay && input.nic_tag.as_deref() == Some(deps.underlay_tag) {
        let _ = ip::release(kv, &ip::bucket_for(&net.uuid), rec.address).await;
        return Err(ApiError::invalid_param(
            "nic_tag",
            "the underlay tag cannot host a fabric network nic",
        ));
    }

    let now = Utc::now();
    let mut nic = Nic {
        mac,
        owner_uuid,
        belongs_to_uuid,
        belongs_to_type,
        state: input.state.unwrap_or(NicState::Running),
        primary: input.primary,
        model: input.model,
        nic_tag: input.nic_tag.clone(),
        nic_tags_provided: input.nic_tags_provided,
        ip: Some(rec.address),
        network_uuid: Some(net.uuid),
        cn_uuid,
        underlay: input.underlay,
        allow_ip_spoofing: input.allow_ip_spoofing,
        allow_mac_spoofing: input.allow_mac_spoofing,
        allow_dhcp_spoofing: input.allow_dhcp_spoofing,
        allow_restricted_traffic: input.allow_restricted_traffic,
        allow_unfiltered_promisc: input.allow_unfiltered_promisc,
        created_ts: now,
        modified_ts: now,
        etag: String::new(),
    };

    let mut ops = Vec::new();
    if nic.primary {
        ops.extend(demote_other_primaries(kv, &belongs_to_uuid, Some(mac)).await?);
    }
    let value = serde_json::to_value(&nic).unwrap();
    ops.push(BatchOp::Put {
        bucket: NICS_BUCKET.to_string(),
        key: mac.to_string(),
        value,
        cond: EtagCondition::MustNotExist,
        unique_fields: vec![],
    });

    if let Err(e) = kv.batch(ops).await {
        let _ = ip::release(kv, &ip::bucket_for(&net.uuid), rec.address).await;
        return Err(match e {
            crate::kv::KvError::EtagConflict => ApiError::EtagConflict,
            other => ApiError::Internal(other.to_string()),
        });
    }

    emit_side_effects(deps, &nic, Some(&net)).await;
    get(kv, &mac.to_string()).await
}

async fn emit_side_effects(deps: &NicDeps<'_>, nic: &Nic, net: Option<&Network>) {
    if nic.is_underlay_nic(deps.underlay_tag) {
        if let Some(ip) = nic.ip {
            deps.overlay
                .upsert_underlay(UnderlayMapping {
                    cn_uuid: nic.belongs_to_uuid,
                    ip,
                    port: crate::models::VXLAN_PORT,
                })
                .await;
        }
    }
    if nic.is_fabric_nic(net) {
        if let (Some(ip), Some(net), Some(cn_uuid)) = (nic.ip, net, nic.cn_uuid) {
            deps.overlay
                .upsert(OverlayMapping {
                    cn_uuid,
                    ip,
                    mac: nic.mac,
                    vnet_id: net.vnet_id.unwrap_or_default(),
                    deleted: false,
                })
                .await;
        }
    }
}

pub async fn get(kv: &dyn KvStore, mac: &str) -> Result<Nic> {
    match kv.get(NICS_BUCKET, mac).await {
        Ok(rec) => from_value(rec.value, rec.etag),
        Err(crate::kv::KvError::NotFound) => Err(ApiError::NotFound(format!("nic {mac}"))),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

#[derive(Debug, Default, Clone)]
pub struct NicListFilter {
    pub belongs_to_uuid: Option<Uuid>,
    pub owner_uuid: Option<Uuid>,
    pub network_uuid: Option<Uuid>,
    pub limit: Option<usize>,
    pub offset: usize,
}

pub async fn list(kv: &dyn KvStore, filter: NicListFilter) -> Result<Vec<Nic>> {
    let rows = kv
        .find(NICS_BUCKET, Filter::All, FindOptions::default())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut nics: Vec<Nic> = rows
        .into_iter()
        .map(|(_, rec)| from_value(rec.value, rec.etag))
        .collect::<Result<Vec<_>>>()?;
    nics.retain(|n| {
        filter.belongs_to_uuid.map_or(true, |v| n.belongs_to_uuid == v)
            && filter.owner_uuid.map_or(true, |v| n.owner_uuid == v)
            && filter.network_uuid.map_or(true, |v| n.network_uuid == Some(v))
    });
    nics.sort_by_key(|n| n.mac);
    if filter.offset > 0 {
        nics = nics.into_iter().skip(filter.offset).collect();
    }
    if let Some(limit) = filter.limit {
        nics.truncate(limit);
    }
    Ok(nics)
}

pub async fn update(kv: &dyn KvStore, deps: &NicDeps<'_>, mac: &str, input: UpdateNic) -> Result<Nic> {
    let current = get(kv, mac).await?;
    let mut nic = current.clone();
    let mut errors = ValidationErrors::new();

    if let Some(raw) = &input.owner_uuid {
        if let Some(u) = validate::parse_uuid(&mut errors, "owner_uuid", raw) {
            nic.owner_uuid = u;
        }
    }
    if let Some(raw) = &input.belongs_to_uuid {
        if let Some(u) = validate::parse_uuid(&mut errors, "belongs_to_uuid", raw) {
            nic.belongs_to_uuid = u;
        }
    }
    if let Some(t) = input.belongs_to_type {
        nic.belongs_to_type = t;
    }
    if let Some(s) = input.state {
        nic.state = s;
    }
    if let Some(tag) = input.nic_tag {
        nic.nic_tag = Some(tag);
    }
    if let Some(provided) = input.nic_tags_provided {
        nic.nic_tags_provided = provided;
    }
    if let Some(raw) = &input.cn_uuid {
        nic.cn_uuid = validate::parse_uuid(&mut errors, "cn_uuid", raw);
    }
    if let Some(u) = input.underlay {
        nic.underlay = u;
    }
    if let Some(v) = input.allow_ip_spoofing {
        nic.allow_ip_spoofing = Some(v);
    }
    if let Some(v) = input.allow_mac_spoofing {
        nic.allow_mac_spoofing = Some(v);
    }
    if let Some(v) = input.allow_dhcp_spoofing {
        nic.allow_dhcp_spoofing = Some(v);
    }
    if let Some(v) = input.allow_restricted_traffic {
        nic.allow_restricted_traffic = Some(v);
    }
    if let Some(v) = input.allow_unfiltered_promisc {
        nic.allow_unfiltered_promisc = Some(v);
    }
    errors.into_result()?;

    let becomes_primary = input.primary == Some(true) && !current.primary;
    if let Some(p) = input.primary {
        nic.primary = p;
    }

    let old_network = current.network_uuid;
    let rebinding = input.network_uuid.is_some() || input.ip.is_some();
    let mut new_network: Option<Network> = None;
    if rebinding {
        let mut errors = ValidationErrors::new();
        let net_uuid = match &input.network_uuid {
            Some(raw) => validate::parse_uuid(&mut errors, "network_uuid", raw),
            None => old_network,
        };
        errors.into_result()?;
        let net_uuid = net_uuid.ok_or_else(|| ApiError::invalid_param("network_uuid", "required to rebind"))?;
        let net = fetch_network(kv, &net_uuid).await?;
        let ip_addr = match &input.ip {
            Some(raw) => {
                let mut errors = ValidationErrors::new();
                let parsed = validate::parse_ip(&mut errors, "ip", raw);
                errors.into_result()?;
                parsed
            }
            None => None,
        };

        let claim = ClaimRequest {
            belongs_to_uuid: Some(nic.belongs_to_uuid),
            belongs_to_type: Some(format!("{:?}", nic.belongs_to_type).to_lowercase()),
            owner_uuid: nic.owner_uuid,
            reserved: false,
        };
        let rec = crate::models::network::claim_provisioned_ip(kv, &net, ip_addr, claim, deps.admin_uuid).await?;
        nic.ip = Some(rec.address);
        nic.network_uuid = Some(net.uuid);
        new_network = Some(net);
    }

    nic.modified_ts = Utc::now();

    let mut ops = Vec::new();
    if becomes_primary {
        ops.extend(demote_other_primaries(kv, &nic.belongs_to_uuid, Some(nic.mac)).await?);
    }
    let value = serde_json::to_value(&nic).unwrap();
    ops.push(BatchOp::Put {
        bucket: NICS_BUCKET.to_string(),
        key: mac.to_string(),
        value,
        cond: EtagCondition::MustMatch(current.etag.clone()),
        unique_fields: vec![],
    });

    if let Err(e) = kv.batch(ops).await {
        if rebinding {
            if let Some(new_addr) = nic.ip {
                if let Some(new_net) = &new_network {
                    let _ = ip::release(kv, &ip::bucket_for(&new_net.uuid), new_addr).await;
                }
            }
        }
        return Err(match e {
            crate::kv::KvError::EtagConflict => ApiError::EtagConflict,
            other => ApiError::Internal(other.to_string()),
        });
    }

    if rebinding {
        if let (Some(old_uuid), Some(old_ip)) = (old_network, current.ip) {
            let _ = ip::release(kv, &ip::bucket_for(&old_uuid), old_ip).await;
        }
    }

    let net_for_effects = new_network.as_ref();
    emit_side_effects(deps, &nic, net_for_effects).await;
    if let Some(new_net) = &new_network {
        if nic.cn_uuid != current.cn_uuid || old_network != nic.network_uuid {
            if let Some(vnet_id) = new_net.vnet_id {
                if let Some(cn_uuid) = nic.cn_uuid {
                    deps.shootdown.notify(vnet_id, cn_uuid).await;
                }
            }
        }
    }

    get(kv, mac).await
}

pub async fn delete(kv: &dyn KvStore, deps: &NicDeps<'_>, mac: &str) -> Result<()> {
    let nic = get(kv, mac).await?;

    if let (Some(net_uuid), Some(ip_addr)) = (nic.network_uuid, nic.ip) {
        ip::release(kv, &ip::bucket_for(&net_uuid), ip_addr).await?;
    }

    kv.delete(NICS_BUCKET, mac, Some(nic.etag.clone()))
        .await
        .map_err(|e| match e {
            crate::kv::KvError::EtagConflict => ApiError::EtagConflict,
            crate::kv::KvError::NotFound => ApiError::NotFound(format!("nic {mac}")),
            other => ApiError::Internal(other.to_string()),
        })?;

    if nic.is_underlay_nic(deps.underlay_tag) {
        deps.overlay.remove_underlay(nic.belongs_to_uuid).await;
    }
    if let (Some(net_uuid), Some(ip_addr), Some(cn_uuid)) = (nic.network_uuid, nic.ip, nic.cn_uuid) {
        if nic.belongs_to_type == BelongsToType::Zone {
            let net = fetch_network(kv, &net_uuid).await.ok();
            let vnet_id = net.as_ref().and_then(|n| n.vnet_id).unwrap_or_default();
            deps.overlay
                .delete_marker(OverlayMapping {
                    cn_uuid,
                    ip: ip_addr,
                    mac: nic.mac,
                    vnet_id,
                    deleted: true,
                })
                .await;
            deps.shootdown.notify(vnet_id, cn_uuid).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::overlay::{InMemoryOverlaySink, LoggingShootdownSink};

    fn deps<'a>(overlay: &'a InMemoryOverlaySink, shootdown: &'a LoggingShootdownSink) -> NicDeps<'a> {
        NicDeps {
            underlay_tag: "underlay",
            overlay,
            shootdown,
            admin_uuid: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn create_without_network_has_no_ip() {
        let kv = MemoryKv::new();
        let overlay = InMemoryOverlaySink::new();
        let shootdown = LoggingShootdownSink;
        let nic = create(
            &kv,
            &deps(&overlay, &shootdown),
            CreateNic {
                mac: Some("AA:BB:CC:DD:EE:01".into()),
                owner_uuid: Some(Uuid::new_v4().to_string()),
                belongs_to_uuid: Some(Uuid::new_v4().to_string()),
                belongs_to_type: Some(BelongsToType::Zone),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(nic.ip.is_none());
    }

    #[tokio::test]
    async fn only_one_primary_per_owner() {
        let kv = MemoryKv::new();
        let overlay = InMemoryOverlaySink::new();
        let shootdown = LoggingShootdownSink;
        let belongs_to = Uuid::new_v4().to_string();

        let first = create(
            &kv,
            &deps(&overlay, &shootdown),
            CreateNic {
                mac: Some("1".into()),
                owner_uuid: Some(Uuid::new_v4().to_string()),
                belongs_to_uuid: Some(belongs_to.clone()),
                belongs_to_type: Some(BelongsToType::Zone),
                primary: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        create(
            &kv,
            &deps(&overlay, &shootdown),
            CreateNic {
                mac: Some("2".into()),
                owner_uuid: Some(Uuid::new_v4().to_string()),
                belongs_to_uuid: Some(belongs_to),
                belongs_to_type: Some(BelongsToType::Zone),
                primary: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let refreshed = get(&kv, &first.mac.to_string()).await.unwrap();
        assert!(!refreshed.primary);
    }

    async fn make_pool(kv: &MemoryKv, tag: &str, subnet: &str, start: &str, end: &str) -> crate::models::pool::NetworkPool {
        crate::models::nic_tag::create(
            kv,
            crate::models::nic_tag::CreateNicTag { name: Some(tag.into()), mtu: Some(1500) },
        )
        .await
        .unwrap();
        let net = crate::models::network::create(
            kv,
            &napi_core::ValidationContext { admin_uuid: Uuid::new_v4(), fabrics_enabled: true },
            crate::models::network::CreateNetwork {
                name: Some(tag.into()),
                nic_tag: Some(tag.into()),
                subnet: Some(subnet.into()),
                provision_start_ip: Some(start.into()),
                provision_end_ip: Some(end.into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        crate::models::pool::create(
            kv,
            crate::models::pool::CreatePool {
                name: Some(format!("{tag}_pool")),
                networks: Some(vec![net.uuid.to_string()]),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_in_pool_claims_address_from_member_network() {
        let kv = MemoryKv::new();
        let overlay = InMemoryOverlaySink::new();
        let shootdown = LoggingShootdownSink;
        let pool = make_pool(&kv, "pool_nic_tag", "10.20.0.0/24", "10.20.0.10", "10.20.0.20").await;

        let nic = create_in_pool(
            &kv,
            &deps(&overlay, &shootdown),
            &pool,
            CreateNic {
                mac: Some("AA:BB:CC:DD:EE:02".into()),
                owner_uuid: Some(Uuid::new_v4().to_string()),
                belongs_to_uuid: Some(Uuid::new_v4().to_string()),
                belongs_to_type: Some(BelongsToType::Zone),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(nic.ip.is_some());
        assert_eq!(nic.network_uuid, Some(pool.networks[0]));
    }

    #[tokio::test]
    async fn create_in_pool_rejects_explicit_network_or_ip() {
        let kv = MemoryKv::new();
        let overlay = InMemoryOverlaySink::new();
        let shootdown = LoggingShootdownSink;
        let pool = make_pool(&kv, "pool_nic_tag2", "10.21.0.0/24", "10.21.0.10", "10.21.0.20").await;

        let err = create_in_pool(
            &kv,
            &deps(&overlay, &shootdown),
            &pool,
            CreateNic {
                mac: Some("AA:BB:CC:DD:EE:03".into()),
                owner_uuid: Some(Uuid::new_v4().to_string()),
                belongs_to_uuid: Some(Uuid::new_v4().to_string()),
                belongs_to_type: Some(BelongsToType::Zone),
                network_uuid: Some(pool.networks[0].to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidParameters { .. }));
    }
}
