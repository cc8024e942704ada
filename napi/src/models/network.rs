//! Network model (spec.md §4.4): classical and fabric logical networks.

use crate::kv::{BatchOp, EtagCondition, Filter, FindOptions, KvStore};
use crate::models::ip::{self, ClaimRequest};
use crate::models::{refcheck, NETWORKS_BUCKET};
use ipnet::IpNet;
use napi_core::addr::{self, Family};
use napi_core::error::{ApiError, FieldError, FieldErrorCode, ValidationErrors};
use napi_core::validate;
use napi_core::Result;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Network {
    pub uuid: Uuid,
    pub name: String,
    pub name_str: String,
    pub description: Option<String>,
    pub nic_tag: String,
    pub vlan_id: u16,
    pub vnet_id: Option<u32>,
    pub mtu: u32,
    pub family: Family,
    #[schema(value_type = String)]
    pub subnet: IpNet,
    #[schema(value_type = String)]
    pub provision_start_ip: IpAddr,
    #[schema(value_type = String)]
    pub provision_end_ip: IpAddr,
    #[schema(value_type = Option<String>)]
    pub gateway: Option<IpAddr>,
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub resolvers: Vec<IpAddr>,
    #[serde(default)]
    pub routes: std::collections::BTreeMap<String, String>,
    pub owner_uuids: Vec<Uuid>,
    #[serde(default)]
    pub fabric: bool,
    #[serde(default)]
    pub internet_nat: bool,
    #[serde(default)]
    pub gateway_provisioned: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateNetwork {
    pub name: Option<String>,
    pub description: Option<String>,
    pub nic_tag: Option<String>,
    pub vlan_id: Option<u16>,
    pub vnet_id: Option<u32>,
    pub mtu: Option<u32>,
    pub subnet: Option<String>,
    pub provision_start_ip: Option<String>,
    pub provision_end_ip: Option<String>,
    pub gateway: Option<String>,
    #[serde(default)]
    pub resolvers: Vec<String>,
    #[serde(default)]
    pub routes: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub owner_uuids: Vec<String>,
    #[serde(default)]
    pub fabric: bool,
    #[serde(default)]
    pub internet_nat: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateNetwork {
    pub name: Option<String>,
    pub description: Option<String>,
    pub gateway: Option<Option<String>>,
    pub resolvers: Option<Vec<String>>,
    pub routes: Option<std::collections::BTreeMap<String, String>>,
    pub provision_start_ip: Option<String>,
    pub provision_end_ip: Option<String>,
    pub mtu: Option<u32>,
    pub owner_uuids: Option<Vec<String>>,

    // Immutable after creation (spec.md §4.4 "Immutable fields"). Captured as
    // untyped `Value`s purely to detect that the caller attempted to set
    // them — `update` rejects the request naming every one present here
    // rather than silently ignoring them.
    pub subnet: Option<serde_json::Value>,
    pub nic_tag: Option<serde_json::Value>,
    pub vlan_id: Option<serde_json::Value>,
    pub vnet_id: Option<serde_json::Value>,
    pub fabric: Option<serde_json::Value>,
    pub family: Option<serde_json::Value>,
}

#[derive(Debug, Default, Clone)]
pub struct ListFilter {
    pub name: Option<String>,
    pub nic_tag: Option<String>,
    pub vlan_id: Option<u16>,
    pub family: Option<Family>,
    pub owner_uuid: Option<Uuid>,
    pub fabric: Option<bool>,
    pub limit: Option<usize>,
    pub offset: usize,
}

fn namespace_name(owner_uuids: &[Uuid], fabric: bool, name: &str) -> String {
    if fabric {
        format!("{}:{name}", owner_uuids.first().map(Uuid::to_string).unwrap_or_default())
    } else {
        format!("global:{name}")
    }
}

fn from_value(value: serde_json::Value, etag: String) -> Result<Network> {
    let mut net: Network = serde_json::from_value(value)
        .map_err(|e| ApiError::Internal(format!("corrupt network: {e}")))?;
    net.etag = etag;
    Ok(net)
}

pub async fn create(
    kv: &dyn KvStore,
    ctx: &napi_core::ValidationContext,
    input: CreateNetwork,
) -> Result<Network> {
    let mut errors = ValidationErrors::new();

    let name = validate::require(&mut errors, "name", input.name.as_ref()).cloned();
    let nic_tag = validate::require(&mut errors, "nic_tag", input.nic_tag.as_ref()).cloned();
    let subnet_raw = validate::require(&mut errors, "subnet", input.subnet.as_ref()).cloned();
    let start_raw = validate::require(
        &mut errors,
        "provision_start_ip",
        input.provision_start_ip.as_ref(),
    )
    .cloned();
    let end_raw = validate::require(
        &mut errors,
        "provision_end_ip",
        input.provision_end_ip.as_ref(),
    )
    .cloned();

    let vlan_id = input.vlan_id.unwrap_or(0);
    validate::validate_vlan_id(&mut errors, "vlan_id", vlan_id);
    if let Some(vnet_id) = input.vnet_id {
        validate::validate_vnet_id(&mut errors, "vnet_id", vnet_id);
    }
    if input.fabric && input.vnet_id.is_none() {
        errors.push(FieldError::new(
            "vnet_id",
            FieldErrorCode::MissingParameter,
            "fabric networks require vnet_id",
        ));
    }
    if input.fabric && !ctx.fabrics_enabled {
        errors.push(FieldError::new(
            "fabric",
            FieldErrorCode::InvalidParameter,
            "fabric networks are disabled on this deployment",
        ));
    }

    let owner_uuids: Vec<Uuid> = input
        .owner_uuids
        .iter()
        .filter_map(|raw| validate::parse_uuid(&mut errors, "owner_uuids", raw))
        .collect();
    if input.fabric && owner_uuids.is_empty() {
        errors.push(FieldError::new(
            "owner_uuids",
            FieldErrorCode::MissingParameter,
            "fabric networks require at least one owner",
        ));
    }

    let subnet = subnet_raw
        .as_ref()
        .and_then(|raw| validate::parse_subnet(&mut errors, "subnet", raw));
    let provision_start = start_raw
        .as_ref()
        .and_then(|raw| validate::parse_ip(&mut errors, "provision_start_ip", raw));
    let provision_end = end_raw
        .as_ref()
        .and_then(|raw| validate::parse_ip(&mut errors, "provision_end_ip", raw));
    let gateway = input
        .gateway
        .as_ref()
        .and_then(|raw| validate::parse_ip(&mut errors, "gateway", raw));
    let resolvers: Vec<IpAddr> = input
        .resolvers
        .iter()
        .filter_map(|raw| validate::parse_ip(&mut errors, "resolvers", raw))
        .collect();

    errors.into_result()?;
    let (subnet, provision_start, provision_end) =
        (subnet.unwrap(), provision_start.unwrap(), provision_end.unwrap());
    let family = Family::of(&subnet);

    let mut errors = ValidationErrors::new();

    if Family::of_addr(&provision_start) != family || Family::of_addr(&provision_end) != family {
        errors.push(FieldError::new(
            "provision_start_ip",
            FieldErrorCode::InvalidParameter,
            "must share the subnet's address family",
        ));
    }
    if provision_start >= provision_end {
        errors.push(FieldError::new(
            "provision_start_ip",
            FieldErrorCode::InvalidParameter,
            "must be less than provision_end_ip",
        ));
    }
    if !addr::net_contains_addr(&subnet, &provision_start)
        || !addr::net_contains_addr(&subnet, &provision_end)
    {
        errors.push(FieldError::new(
            "provision_start_ip",
            FieldErrorCode::InvalidParameter,
            "provision range must lie within the subnet",
        ));
    }
    if let IpNet::V4(v4) = &subnet {
        let bcast = addr::ipv4_broadcast(v4);
        if provision_start == bcast || provision_end == bcast {
            errors.push(FieldError::new(
                "provision_end_ip",
                FieldErrorCode::InvalidParameter,
                "provision range cannot include the broadcast address",
            ));
        }
    }
    if let Some(gw) = gateway {
        if Family::of_addr(&gw) != family {
            errors.push(FieldError::new(
                "gateway",
                FieldErrorCode::InvalidParameter,
                "must share the subnet's address family",
            ));
        }
    }
    for r in &resolvers {
        if Family::of_addr(r) != family {
            errors.push(FieldError::new(
                "resolvers",
                FieldErrorCode::InvalidParameter,
                "must share the subnet's address family",
            ));
            break;
        }
    }
    if input.fabric && !addr::is_private(&subnet) {
        errors.push(FieldError::new(
            "subnet",
            FieldErrorCode::InvalidParameter,
            "fabric network subnets must be RFC1918 (v4) or ULA (v6)",
        ));
    }

    let tag = crate::models::nic_tag::get(kv, nic_tag.as_deref().unwrap_or_default())
        .await
        .map_err(|_| ApiError::invalid_param("nic_tag", "no such nic tag"))?;
    let mtu = input.mtu.unwrap_or(tag.mtu);
    if mtu > tag.mtu {
        errors.push(FieldError::new(
            "mtu",
            FieldErrorCode::InvalidParameter,
            format!("cannot exceed nic tag {}'s mtu of {}", tag.name, tag.mtu),
        ));
    } else {
        validate::validate_mtu(&mut errors, "mtu", mtu);
    }

    errors.into_result()?;

    let overlapping = find_overlaps(kv, &subnet, input.fabric, input.vnet_id, None).await?;
    if !overlapping.is_empty() {
        return Err(ApiError::NetworkOverlap(overlapping));
    }

    let uuid = Uuid::new_v4();
    let name_str = namespace_name(&owner_uuids, input.fabric, name.as_deref().unwrap_or_default());
    let network = Network {
        uuid,
        name: name.unwrap_or_default(),
        name_str: name_str.clone(),
        description: input.description,
        nic_tag: nic_tag.unwrap_or_default(),
        vlan_id,
        vnet_id: input.vnet_id,
        mtu,
        family,
        subnet,
        provision_start_ip: provision_start,
        provision_end_ip: provision_end,
        gateway,
        resolvers: resolvers.clone(),
        routes: input.routes,
        owner_uuids: owner_uuids.clone(),
        fabric: input.fabric,
        internet_nat: input.internet_nat,
        gateway_provisioned: false,
        etag: String::new(),
    };
    let value = serde_json::to_value(&network).unwrap();

    let etag = kv
        .put(
            NETWORKS_BUCKET,
            &uuid.to_string(),
            value,
            EtagCondition::MustNotExist,
            &["name_str"],
        )
        .await
        .map_err(|e| match e {
            crate::kv::KvError::UniqueAttribute(_) => ApiError::used_by("name", "an existing network"),
            other => ApiError::Internal(other.to_string()),
        })?;

    seed_ip_bucket(kv, &network).await?;

    Ok(Network { etag, ..network })
}

async fn seed_ip_bucket(kv: &dyn KvStore, net: &Network) -> Result<()> {
    let bucket = ip::bucket_for(&net.uuid);
    kv.init_bucket(&bucket).await;

    let owner = net.owner_uuids.first().copied().unwrap_or_default();
    if let Some(gw) = net.gateway {
        ip::reserve(kv, &bucket, gw, owner).await?;
    }
    for r in &net.resolvers {
        if addr::net_contains_addr(&net.subnet, r) {
            ip::reserve(kv, &bucket, *r, owner).await?;
        }
    }
    if let IpNet::V4(v4) = &net.subnet {
        ip::reserve(kv, &bucket, IpAddr::V4(addr::ipv4_broadcast(v4)), owner).await?;
    }

    if let Some(before_start) = addr::prev_addr(net.provision_start_ip) {
        ip::put_placeholder(kv, &bucket, before_start).await?;
    }
    if let Some(after_end) = addr::next_addr(net.provision_end_ip) {
        ip::put_placeholder(kv, &bucket, after_end).await?;
    }
    Ok(())
}

/// Overlap check (spec.md §4.4): classical networks outside RFC1918/ULA
/// never overlap any other classical network; fabric networks only collide
/// with other fabric networks in the same vnet.
async fn find_overlaps(
    kv: &dyn KvStore,
    subnet: &IpNet,
    fabric: bool,
    vnet_id: Option<u32>,
    exclude_uuid: Option<&Uuid>,
) -> Result<Vec<String>> {
    let rows = kv
        .find(NETWORKS_BUCKET, Filter::All, FindOptions::default())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut hits = Vec::new();
    for (key, rec) in rows {
        if exclude_uuid.is_some_and(|u| u.to_string() == key) {
            continue;
        }
        let other = from_value(rec.value, rec.etag)?;
        if other.family != Family::of(subnet) {
            continue;
        }
        if fabric {
            if !other.fabric || other.vnet_id != vnet_id {
                continue;
            }
        } else {
            if other.fabric {
                continue;
            }
            if addr::is_private(subnet) && addr::is_private(&other.subnet) {
                continue;
            }
        }
        if addr::subnets_overlap(subnet, &other.subnet) {
            hits.push(other.uuid.to_string());
        }
    }
    hits.sort();
    Ok(hits)
}

pub async fn get(kv: &dyn KvStore, uuid_or_admin: &str, _ctx: &napi_core::ValidationContext) -> Result<Network> {
    let net = if uuid_or_admin == "admin" {
        let rows = kv
            .find(
                NETWORKS_BUCKET,
                Filter::Eq("name_str".to_string(), serde_json::json!("global:admin")),
                FindOptions::default(),
            )
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        if rows.len() > 1 {
            tracing::warn!(count = rows.len(), "multiple networks named global:admin");
        }
        let (_, rec) = rows
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound("network admin".to_string()))?;
        from_value(rec.value, rec.etag)?
    } else {
        match kv.get(NETWORKS_BUCKET, uuid_or_admin).await {
            Ok(rec) => from_value(rec.value, rec.etag)?,
            Err(crate::kv::KvError::NotFound) => {
                return Err(ApiError::NotFound(format!("network {uuid_or_admin}")))
            }
            Err(e) => return Err(ApiError::Internal(e.to_string())),
        }
    };

    Ok(net)
}

pub async fn list(kv: &dyn KvStore, filter: ListFilter) -> Result<Vec<Network>> {
    let rows = kv
        .find(NETWORKS_BUCKET, Filter::All, FindOptions::default())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut nets: Vec<Network> = rows
        .into_iter()
        .map(|(_, rec)| from_value(rec.value, rec.etag))
        .collect::<Result<Vec<_>>>()?;

    nets.retain(|n| {
        filter.name.as_deref().map_or(true, |v| n.name == v)
            && filter.nic_tag.as_deref().map_or(true, |v| n.nic_tag == v)
            && filter.vlan_id.map_or(true, |v| n.vlan_id == v)
            && filter.family.map_or(true, |v| n.family == v)
            && filter.fabric.map_or(true, |v| n.fabric == v)
            && filter
                .owner_uuid
                .map_or(true, |v| n.owner_uuids.is_empty() || n.owner_uuids.contains(&v))
    });
    nets.sort_by_key(|n| n.uuid);

    if filter.offset > 0 {
        nets = nets.into_iter().skip(filter.offset).collect();
    }
    if let Some(limit) = filter.limit {
        nets.truncate(limit);
    }
    Ok(nets)
}

pub async fn update(
    kv: &dyn KvStore,
    uuid: &str,
    ctx: &napi_core::ValidationContext,
    input: UpdateNetwork,
) -> Result<Network> {
    let current = get(kv, uuid, ctx).await?;

    let mut errors = ValidationErrors::new();
    for (field, attempted) in [
        ("subnet", input.subnet.is_some()),
        ("nic_tag", input.nic_tag.is_some()),
        ("vlan_id", input.vlan_id.is_some()),
        ("vnet_id", input.vnet_id.is_some()),
        ("fabric", input.fabric.is_some()),
        ("family", input.family.is_some()),
    ] {
        if attempted {
            errors.push(FieldError::new(
                field,
                FieldErrorCode::InvalidParameter,
                format!("{field} is immutable"),
            ));
        }
    }
    errors.into_result()?;

    let mut errors = ValidationErrors::new();
    if current.fabric {
        if input.owner_uuids.is_some() {
            errors.push(FieldError::new(
                "owner_uuids",
                FieldErrorCode::InvalidParameter,
                "field is immutable after creation on fabric networks",
            ));
        }
        if matches!(input.gateway, Some(_)) {
            errors.push(FieldError::new(
                "gateway",
                FieldErrorCode::InvalidParameter,
                "field is immutable after creation on fabric networks",
            ));
        }
    }
    errors.into_result()?;

    let mut net = current.clone();

    if let Some(name) = &input.name {
        net.name = name.clone();
        net.name_str = namespace_name(&net.owner_uuids, net.fabric, name);
    }
    if let Some(desc) = input.description {
        net.description = Some(desc);
    }
    let mut moved_start = None;
    let mut moved_end = None;
    if let Some(raw) = &input.provision_start_ip {
        if let Some(addr) = validate::parse_ip(&mut errors, "provision_start_ip", raw) {
            moved_start = Some((net.provision_start_ip, addr));
            net.provision_start_ip = addr;
        }
    }
    if let Some(raw) = &input.provision_end_ip {
        if let Some(addr) = validate::parse_ip(&mut errors, "provision_end_ip", raw) {
            moved_end = Some((net.provision_end_ip, addr));
            net.provision_end_ip = addr;
        }
    }
    let mut gateway_changed = false;
    if let Some(gw_opt) = &input.gateway {
        net.gateway = match gw_opt {
            Some(raw) => validate::parse_ip(&mut errors, "gateway", raw),
            None => None,
        };
        gateway_changed = true;
    }
    if let Some(resolvers) = &input.resolvers {
        net.resolvers = resolvers
            .iter()
            .filter_map(|raw| validate::parse_ip(&mut errors, "resolvers", raw))
            .collect();
    }
    if let Some(routes) = input.routes {
        net.routes = routes;
    }
    if let Some(mtu) = input.mtu {
        let tag = crate::models::nic_tag::get(kv, &net.nic_tag).await?;
        if mtu > tag.mtu {
            errors.push(FieldError::new(
                "mtu",
                FieldErrorCode::InvalidParameter,
                "cannot exceed the nic tag's mtu",
            ));
        } else {
            validate::validate_mtu(&mut errors, "mtu", mtu);
        }
        net.mtu = mtu;
    }
    if let Some(raw_owners) = &input.owner_uuids {
        net.owner_uuids = raw_owners
            .iter()
            .filter_map(|raw| validate::parse_uuid(&mut errors, "owner_uuids", raw))
            .collect();
    }
    errors.into_result()?;

    let value = serde_json::to_value(&net).unwrap();
    let bucket = ip::bucket_for(&net.uuid);
    let ops = vec![BatchOp::Put {
        bucket: NETWORKS_BUCKET.to_string(),
        key: net.uuid.to_string(),
        value,
        cond: EtagCondition::MustMatch(current.etag.clone()),
        unique_fields: vec!["name_str".to_string()],
    }];

    // Commit the network row first; only once it has landed do we touch the
    // IP bucket, so an etag conflict here never leaves placeholders moved or
    // a gateway reserved against a row update that didn't actually happen.
    kv.batch(ops).await.map_err(|e| match e {
        crate::kv::KvError::EtagConflict => ApiError::EtagConflict,
        crate::kv::KvError::UniqueAttribute(_) => ApiError::used_by("name", "an existing network"),
        other => ApiError::Internal(other.to_string()),
    })?;

    if let Some((old, new)) = moved_start {
        ip::remove_placeholder_if_still_placeholder(kv, &bucket, addr::prev_addr(old).unwrap()).await?;
        ip::put_placeholder(kv, &bucket, addr::prev_addr(new).unwrap()).await?;
    }
    if let Some((old, new)) = moved_end {
        ip::remove_placeholder_if_still_placeholder(kv, &bucket, addr::next_addr(old).unwrap()).await?;
        ip::put_placeholder(kv, &bucket, addr::next_addr(new).unwrap()).await?;
    }
    if gateway_changed {
        if let Some(gw) = net.gateway {
            let owner = net.owner_uuids.first().copied().unwrap_or_default();
            ip::reserve(kv, &bucket, gw, owner).await?;
        }
    }

    get(kv, &net.uuid.to_string(), ctx).await
}

pub async fn delete(kv: &dyn KvStore, uuid: &str, ctx: &napi_core::ValidationContext) -> Result<()> {
    let net = get(kv, uuid, ctx).await?;
    let referencing = refcheck::nic_macs_referencing_network(kv, &net.uuid.to_string()).await;
    if !referencing.is_empty() {
        return Err(ApiError::in_use(
            format!("network {uuid} has bound nics"),
            referencing,
        ));
    }
    kv.delete(NETWORKS_BUCKET, &net.uuid.to_string(), Some(net.etag))
        .await
        .map_err(|e| match e {
            crate::kv::KvError::EtagConflict => ApiError::EtagConflict,
            crate::kv::KvError::NotFound => ApiError::NotFound(format!("network {uuid}")),
            other => ApiError::Internal(other.to_string()),
        })?;
    kv.delete_bucket(&ip::bucket_for(&net.uuid))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::models::nic_tag::{self, CreateNicTag};

    fn ctx() -> napi_core::ValidationContext {
        napi_core::ValidationContext {
            admin_uuid: Uuid::new_v4(),
            fabrics_enabled: true,
        }
    }

    async fn make_tag(kv: &MemoryKv, name: &str) {
        nic_tag::create(kv, CreateNicTag { name: Some(name.into()), mtu: Some(1500) })
            .await
            .unwrap();
    }

    fn create_input(name: &str, tag: &str, subnet: &str, start: &str, end: &str) -> CreateNetwork {
        CreateNetwork {
            name: Some(name.into()),
            nic_tag: Some(tag.into()),
            subnet: Some(subnet.into()),
            provision_start_ip: Some(start.into()),
            provision_end_ip: Some(end.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn gateway_is_reserved_on_create() {
        let kv = MemoryKv::new();
        make_tag(&kv, "net0").await;
        let mut input = create_input("net0", "net0", "10.0.0.0/24", "10.0.0.10", "10.0.0.20");
        input.gateway = Some("10.0.0.1".into());
        let net = create(&kv, &ctx(), input).await.unwrap();

        let gw = crate::models::ip::get(&kv, &ip::bucket_for(&net.uuid), net.gateway.unwrap())
            .await
            .unwrap()
            .expect("gateway ip row must exist");
        assert!(gw.reserved);
        assert!(!gw.is_free());
        assert_eq!(gw.belongs_to_type.as_deref(), Some("other"));
    }

    #[tokio::test]
    async fn classical_overlap_rejected_outside_private_ranges() {
        let kv = MemoryKv::new();
        make_tag(&kv, "net1").await;
        create(
            &kv,
            &ctx(),
            create_input("net1", "net1", "203.0.113.0/24", "203.0.113.10", "203.0.113.20"),
        )
        .await
        .unwrap();

        let err = create(
            &kv,
            &ctx(),
            create_input("net2", "net1", "203.0.113.128/25", "203.0.113.130", "203.0.113.140"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NetworkOverlap(_)));
    }

    #[tokio::test]
    async fn rfc1918_classical_overlap_allowed() {
        let kv = MemoryKv::new();
        make_tag(&kv, "net2").await;
        create(
            &kv,
            &ctx(),
            create_input("net3", "net2", "10.1.0.0/24", "10.1.0.10", "10.1.0.20"),
        )
        .await
        .unwrap();

        create(
            &kv,
            &ctx(),
            create_input("net4", "net2", "10.1.0.0/25", "10.1.0.30", "10.1.0.40"),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn provision_range_move_relocates_placeholder() {
        let kv = MemoryKv::new();
        make_tag(&kv, "net3").await;
        let net = create(
            &kv,
            &ctx(),
            create_input("net5", "net3", "10.2.0.0/24", "10.2.0.10", "10.2.0.20"),
        )
        .await
        .unwrap();

        let moved = update(
            &kv,
            &net.uuid.to_string(),
            &ctx(),
            UpdateNetwork {
                provision_start_ip: Some("10.2.0.5".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(moved.provision_start_ip.to_string(), "10.2.0.5");

        let claim = ClaimRequest {
            belongs_to_uuid: Some(Uuid::new_v4()),
            belongs_to_type: Some("zone".into()),
            owner_uuid: Uuid::new_v4(),
            reserved: false,
        };
        let claimed = ip::allocate_next(
            &kv,
            &ip::bucket_for(&net.uuid),
            moved.provision_start_ip,
            moved.provision_end_ip,
            claim,
        )
        .await
        .unwrap();
        assert_eq!(claimed.address.to_string(), "10.2.0.5");
    }

    #[tokio::test]
    async fn update_rejects_immutable_vlan_id() {
        let kv = MemoryKv::new();
        make_tag(&kv, "net6").await;
        let net = create(
            &kv,
            &ctx(),
            create_input("net6_net", "net6", "10.4.0.0/24", "10.4.0.10", "10.4.0.20"),
        )
        .await
        .unwrap();

        let err = update(
            &kv,
            &net.uuid.to_string(),
            &ctx(),
            UpdateNetwork {
                vlan_id: Some(serde_json::json!(99)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidParameters { .. }));
    }

    #[tokio::test]
    async fn fabric_network_requires_owner_and_vnet() {
        let kv = MemoryKv::new();
        make_tag(&kv, "net4").await;
        let mut input = create_input("fab1", "net4", "10.3.0.0/24", "10.3.0.10", "10.3.0.20");
        input.fabric = true;
        let err = create(&kv, &ctx(), input).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidParameters { .. }));
    }
}

pub async fn claim_provisioned_ip(
    kv: &dyn KvStore,
    net: &Network,
    addr_opt: Option<IpAddr>,
    claim: ClaimRequest,
    admin_uuid: Uuid,
) -> Result<ip::IpRecord> {
    let bucket = ip::bucket_for(&net.uuid);
    match addr_opt {
        Some(addr) => {
            if !addr::net_contains_addr(&net.subnet, &addr) {
                return Err(ApiError::invalid_param("ip", "address is not in the network's subnet"));
            }
            ip::claim_specific(kv, &bucket, addr, claim, admin_uuid).await
        }
        None => {
            ip::allocate_next(kv, &bucket, net.provision_start_ip, net.provision_end_ip, claim).await
        }
    }
}
