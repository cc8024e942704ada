//! Network-pool model (spec.md §4.6): an ordered set of same-family networks
//! tried in turn for provisioning.

use crate::kv::{EtagCondition, Filter, FindOptions, KvStore};
use crate::models::network::{self, Network};
use crate::models::POOLS_BUCKET;
use napi_core::error::{ApiError, ValidationErrors};
use napi_core::validate;
use napi_core::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NetworkPool {
    pub uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub networks: Vec<Uuid>,
    #[serde(default)]
    pub owner_uuids: Vec<Uuid>,
    /// Computed at response time from member networks, never persisted
    /// (spec.md §9: "the `_netobjs` back-pointer ... is a computed,
    /// non-persisted field").
    #[serde(skip)]
    pub nic_tags_present: Vec<String>,
    pub family: napi_core::Family,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreatePool {
    pub name: Option<String>,
    pub description: Option<String>,
    pub networks: Option<Vec<String>>,
    #[serde(default)]
    pub owner_uuids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePool {
    pub name: Option<String>,
    pub description: Option<String>,
    pub networks: Option<Vec<String>>,
    pub owner_uuids: Option<Vec<String>>,
}

async fn resolve_networks(kv: &dyn KvStore, ids: &[Uuid]) -> Result<Vec<Network>> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        match kv.get(crate::models::NETWORKS_BUCKET, &id.to_string()).await {
            Ok(rec) => out.push(
                serde_json::from_value::<Network>(rec.value)
                    .map(|mut n| {
                        n.etag = rec.etag;
                        n
                    })
                    .map_err(|e| ApiError::Internal(e.to_string()))?,
            ),
            Err(_) => return Err(ApiError::invalid_param("networks", format!("no such network {id}"))),
        }
    }
    Ok(out)
}

fn compute_nic_tags_present(nets: &[Network]) -> Vec<String> {
    let mut set: BTreeSet<String> = BTreeSet::new();
    for n in nets {
        set.insert(n.nic_tag.clone());
    }
    set.into_iter().collect()
}

fn owners_subset_of_members(owners: &[Uuid], nets: &[Network]) -> bool {
    if owners.is_empty() {
        return true;
    }
    owners.iter().all(|owner| {
        nets.iter()
            .all(|n| n.owner_uuids.is_empty() || n.owner_uuids.contains(owner))
    })
}

fn from_stored(mut pool: NetworkPool, nets: &[Network]) -> NetworkPool {
    pool.nic_tags_present = compute_nic_tags_present(nets);
    pool
}

pub async fn create(kv: &dyn KvStore, input: CreatePool) -> Result<NetworkPool> {
    let mut errors = ValidationErrors::new();
    let name = validate::require(&mut errors, "name", input.name.as_ref()).cloned();
    let network_ids_raw = validate::require(&mut errors, "networks", input.networks.as_ref()).cloned();
    errors.into_result()?;

    let network_ids_raw = network_ids_raw.unwrap();
    validate_len_or_err(&network_ids_raw)?;

    let mut errors = ValidationErrors::new();
    let network_ids: Vec<Uuid> = network_ids_raw
        .iter()
        .filter_map(|raw| validate::parse_uuid(&mut errors, "networks", raw))
        .collect();
    let owner_uuids: Vec<Uuid> = input
        .owner_uuids
        .iter()
        .filter_map(|raw| validate::parse_uuid(&mut errors, "owner_uuids", raw))
        .collect();
    errors.into_result()?;

    let nets = resolve_networks(kv, &network_ids).await?;
    let family = nets
        .first()
        .map(|n| n.family)
        .ok_or_else(|| ApiError::invalid_param("networks", "must name at least one network"))?;
    if nets.iter().any(|n| n.family != family) {
        return Err(ApiError::invalid_param(
            "networks",
            "all member networks must share one address family",
        ));
    }
    if !owners_subset_of_members(&owner_uuids, &nets) {
        return Err(ApiError::invalid_param(
            "owner_uuids",
            "must be a subset of every member network's owners",
        ));
    }

    let pool = NetworkPool {
        uuid: Uuid::new_v4(),
        name: name.unwrap_or_default(),
        description: input.description,
        networks: network_ids,
        owner_uuids,
        nic_tags_present: Vec::new(),
        family,
        etag: String::new(),
    };
    let value = serde_json::to_value(&pool).unwrap();
    let etag = kv
        .put(
            POOLS_BUCKET,
            &pool.uuid.to_string(),
            value,
            EtagCondition::MustNotExist,
            &[],
        )
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(from_stored(NetworkPool { etag, ..pool }, &nets))
}

fn validate_len_or_err(ids: &[String]) -> Result<()> {
    let mut errors = ValidationErrors::new();
    validate::validate_len(&mut errors, "networks", ids.len(), 1, 64);
    errors.into_result()
}

pub async fn get(kv: &dyn KvStore, uuid: &str) -> Result<NetworkPool> {
    let rec = match kv.get(POOLS_BUCKET, uuid).await {
        Ok(rec) => rec,
        Err(crate::kv::KvError::NotFound) => return Err(ApiError::NotFound(format!("network pool {uuid}"))),
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    };
    let mut pool: NetworkPool =
        serde_json::from_value(rec.value).map_err(|e| ApiError::Internal(e.to_string()))?;
    pool.etag = rec.etag;
    let nets = resolve_networks(kv, &pool.networks).await?;
    Ok(from_stored(pool, &nets))
}

pub async fn list(kv: &dyn KvStore) -> Result<Vec<NetworkPool>> {
    let rows = kv
        .find(POOLS_BUCKET, Filter::All, FindOptions::default())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut out = Vec::with_capacity(rows.len());
    for (_, rec) in rows {
        let mut pool: NetworkPool =
            serde_json::from_value(rec.value).map_err(|e| ApiError::Internal(e.to_string()))?;
        pool.etag = rec.etag;
        let nets = resolve_networks(kv, &pool.networks).await?;
        out.push(from_stored(pool, &nets));
    }
    out.sort_by_key(|p| p.uuid);
    Ok(out)
}

pub async fn update(kv: &dyn KvStore, uuid: &str, input: UpdatePool) -> Result<NetworkPool> {
    let current = get(kv, uuid).await?;
    let mut pool = current.clone();

    if let Some(name) = input.name {
        pool.name = name;
    }
    if let Some(desc) = input.description {
        pool.description = Some(desc);
    }

    let mut errors = ValidationErrors::new();
    if let Some(raw_ids) = &input.networks {
        validate::validate_len(&mut errors, "networks", raw_ids.len(), 1, 64);
        pool.networks = raw_ids
            .iter()
            .filter_map(|raw| validate::parse_uuid(&mut errors, "networks", raw))
            .collect();
    }
    if let Some(raw_owners) = &input.owner_uuids {
        pool.owner_uuids = raw_owners
            .iter()
            .filter_map(|raw| validate::parse_uuid(&mut errors, "owner_uuids", raw))
            .collect();
    }
    errors.into_result()?;

    let nets = resolve_networks(kv, &pool.networks).await?;
    if nets.iter().any(|n| n.family != pool.family) {
        return Err(ApiError::invalid_param(
            "networks",
            "all member networks must share the pool's address family",
        ));
    }
    if !owners_subset_of_members(&pool.owner_uuids, &nets) {
        return Err(ApiError::invalid_param(
            "owner_uuids",
            "must be a subset of every member network's owners",
        ));
    }

    let value = serde_json::to_value(&pool).unwrap();
    let etag = kv
        .put(
            POOLS_BUCKET,
            &pool.uuid.to_string(),
            value,
            EtagCondition::MustMatch(current.etag),
            &[],
        )
        .await
        .map_err(|e| match e {
            crate::kv::KvError::EtagConflict => ApiError::EtagConflict,
            other => ApiError::Internal(other.to_string()),
        })?;

    Ok(from_stored(NetworkPool { etag, ..pool }, &nets))
}

/// Deletion is unconditional at the pool level (spec.md §4.6: no
/// cross-reference check).
pub async fn delete(kv: &dyn KvStore, uuid: &str) -> Result<()> {
    match kv.delete(POOLS_BUCKET, uuid, None).await {
        Ok(()) | Err(crate::kv::KvError::NotFound) => Ok(()),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::models::network::{self, CreateNetwork};
    use crate::models::nic_tag::{self, CreateNicTag};

    fn ctx() -> napi_core::ValidationContext {
        napi_core::ValidationContext {
            admin_uuid: Uuid::new_v4(),
            fabrics_enabled: true,
        }
    }

    async fn make_network(kv: &MemoryKv, name: &str, subnet: &str, start: &str, end: &str) -> Network {
        nic_tag::create(kv, CreateNicTag { name: Some(name.into()), mtu: Some(1500) })
            .await
            .unwrap();
        network::create(
            kv,
            &ctx(),
            CreateNetwork {
                name: Some(name.into()),
                nic_tag: Some(name.into()),
                subnet: Some(subnet.into()),
                provision_start_ip: Some(start.into()),
                provision_end_ip: Some(end.into()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_pool_computes_nic_tags_present() {
        let kv = MemoryKv::new();
        let a = make_network(&kv, "pool_a", "10.10.0.0/24", "10.10.0.10", "10.10.0.20").await;
        let b = make_network(&kv, "pool_b", "10.11.0.0/24", "10.11.0.10", "10.11.0.20").await;

        let pool = create(
            &kv,
            CreatePool {
                name: Some("mypool".into()),
                networks: Some(vec![a.uuid.to_string(), b.uuid.to_string()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(pool.nic_tags_present, vec!["pool_a".to_string(), "pool_b".to_string()]);
    }

    #[tokio::test]
    async fn create_pool_rejects_mixed_families() {
        let kv = MemoryKv::new();
        let a = make_network(&kv, "pool_c", "10.12.0.0/24", "10.12.0.10", "10.12.0.20").await;
        nic_tag::create(&kv, CreateNicTag { name: Some("pool_d".into()), mtu: Some(1500) })
            .await
            .unwrap();
        let b = network::create(
            &kv,
            &ctx(),
            CreateNetwork {
                name: Some("pool_d".into()),
                nic_tag: Some("pool_d".into()),
                subnet: Some("fd00:1::/64".into()),
                provision_start_ip: Some("fd00:1::10".into()),
                provision_end_ip: Some("fd00:1::20".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let err = create(
            &kv,
            CreatePool {
                name: Some("mixed".into()),
                networks: Some(vec![a.uuid.to_string(), b.uuid.to_string()]),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidParameters { .. }));
    }

    #[tokio::test]
    async fn provision_in_pool_falls_through_to_second_member_when_first_is_full() {
        let kv = MemoryKv::new();
        let a = make_network(&kv, "pool_e", "10.13.0.0/30", "10.13.0.1", "10.13.0.2").await;
        let b = make_network(&kv, "pool_f", "10.14.0.0/24", "10.14.0.10", "10.14.0.20").await;

        // Pre-fill the second of network a's two provisionable addresses so a
        // single allocation exhausts it.
        crate::models::ip::claim_specific(
            &kv,
            &crate::models::ip::bucket_for(&a.uuid),
            "10.13.0.2".parse().unwrap(),
            crate::models::ip::ClaimRequest {
                belongs_to_uuid: Some(Uuid::new_v4()),
                belongs_to_type: Some("zone".into()),
                owner_uuid: Uuid::new_v4(),
                reserved: false,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let pool = create(
            &kv,
            CreatePool {
                name: Some("fallthrough".into()),
                networks: Some(vec![a.uuid.to_string(), b.uuid.to_string()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let claim = crate::models::ip::ClaimRequest {
            belongs_to_uuid: Some(Uuid::new_v4()),
            belongs_to_type: Some("zone".into()),
            owner_uuid: Uuid::new_v4(),
            reserved: false,
        };
        let (net, rec) = provision_in_pool(&kv, &pool, claim.clone()).await.unwrap();
        assert_eq!(net.uuid, a.uuid);

        let (net2, _) = provision_in_pool(&kv, &pool, claim).await.unwrap();
        assert_eq!(net2.uuid, b.uuid);
        let _ = rec;
    }
}

/// Provision a NIC in a pool: try members in stable order until one
/// succeeds or all raise `SubnetFull` (spec.md §4.7 "Provisioning
/// variants"). Returns the network that succeeded plus the claimed IP.
pub async fn provision_in_pool(
    kv: &dyn KvStore,
    pool: &NetworkPool,
    claim: crate::models::ip::ClaimRequest,
) -> Result<(Network, crate::models::ip::IpRecord)> {
    let mut last_err = ApiError::SubnetFull;
    for net_uuid in &pool.networks {
        let net = match kv.get(crate::models::NETWORKS_BUCKET, &net_uuid.to_string()).await {
            Ok(rec) => serde_json::from_value::<Network>(rec.value)
                .map(|mut n| {
                    n.etag = rec.etag;
                    n
                })
                .map_err(|e| ApiError::Internal(e.to_string()))?,
            Err(_) => continue,
        };
        let bucket = crate::models::ip::bucket_for(&net.uuid);
        match crate::models::ip::allocate_next(
            kv,
            &bucket,
            net.provision_start_ip,
            net.provision_end_ip,
            claim.clone(),
        )
        .await
        {
            Ok(rec) => return Ok((net, rec)),
            Err(ApiError::SubnetFull) => {
                last_err = ApiError::SubnetFull;
                continue;
            }
            Err(other) => return Err(other),
        }
    }
    Err(last_err)
}
