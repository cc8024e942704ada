//! NIC-tag model (spec.md §4.3): a named handle for an L2 segment.

use crate::kv::{BatchOp, EtagCondition, Filter, FindOptions, KvStore};
use crate::models::{refcheck, NETWORKS_BUCKET, NIC_TAGS_BUCKET, RESERVED_ADMIN_TAG, RESERVED_EXTERNAL_TAG};
use napi_core::error::{ApiError, ValidationErrors};
use napi_core::validate;
use napi_core::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
pub struct NicTag {
    pub uuid: Uuid,
    pub name: String,
    pub mtu: u32,
    pub etag: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateNicTag {
    pub name: Option<String>,
    pub mtu: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateNicTag {
    pub name: Option<String>,
    pub mtu: Option<u32>,
}

fn from_value(name: &str, etag: String, value: serde_json::Value) -> Result<NicTag> {
    let mut tag: NicTag = serde_json::from_value(value)
        .map_err(|e| ApiError::Internal(format!("corrupt nic_tag {name}: {e}")))?;
    tag.etag = etag;
    Ok(tag)
}

pub async fn create(kv: &dyn KvStore, input: CreateNicTag) -> Result<NicTag> {
    let mut errors = ValidationErrors::new();
    let name = match validate::require(&mut errors, "name", input.name.as_ref()) {
        Some(n) => n.clone(),
        None => return Err(errors.into_result().unwrap_err()),
    };
    validate::validate_tag_name(&mut errors, "name", &name);

    let mtu = input.mtu.unwrap_or(1500);
    if name == RESERVED_ADMIN_TAG && mtu != 1500 {
        errors.push(napi_core::error::FieldError::new(
            "mtu",
            napi_core::error::FieldErrorCode::InvalidParameter,
            "the admin tag's MTU must be 1500",
        ));
    } else {
        validate::validate_mtu(&mut errors, "mtu", mtu);
    }
    errors.into_result()?;

    let tag = NicTag {
        uuid: Uuid::new_v4(),
        name: name.clone(),
        mtu,
        etag: String::new(),
    };
    let value = serde_json::to_value(&tag).unwrap();
    match kv
        .put(NIC_TAGS_BUCKET, &name, value, EtagCondition::MustNotExist, &[])
        .await
    {
        Ok(etag) => Ok(NicTag { etag, ..tag }),
        Err(crate::kv::KvError::EtagConflict) => {
            Err(ApiError::used_by("name", "an existing nic tag"))
        }
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

pub async fn get(kv: &dyn KvStore, name: &str) -> Result<NicTag> {
    match kv.get(NIC_TAGS_BUCKET, name).await {
        Ok(rec) => from_value(name, rec.etag, rec.value),
        Err(crate::kv::KvError::NotFound) => Err(ApiError::NotFound(format!("nic tag {name}"))),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

pub async fn list(kv: &dyn KvStore) -> Result<Vec<NicTag>> {
    let rows = kv
        .find(NIC_TAGS_BUCKET, Filter::All, FindOptions::default())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    rows.into_iter()
        .map(|(k, rec)| from_value(&k, rec.etag, rec.value))
        .collect()
}

pub async fn update(kv: &dyn KvStore, old_name: &str, input: UpdateNicTag) -> Result<NicTag> {
    if input.name.is_none() && input.mtu.is_none() {
        return Err(ApiError::invalid_param(
            "name",
            "at least one of name or mtu must be given",
        ));
    }
    let current = get(kv, old_name).await?;
    if old_name == RESERVED_ADMIN_TAG {
        return Err(ApiError::invalid_param(
            "name",
            "the admin nic tag cannot be updated",
        ));
    }

    let mut errors = ValidationErrors::new();
    let new_name = match &input.name {
        Some(n) if n != old_name => {
            if old_name == RESERVED_EXTERNAL_TAG {
                errors.push(napi_core::error::FieldError::new(
                    "name",
                    napi_core::error::FieldErrorCode::InvalidParameter,
                    "the external nic tag cannot be renamed",
                ));
            }
            validate::validate_tag_name(&mut errors, "name", n);
            n.clone()
        }
        _ => old_name.to_string(),
    };

    let new_mtu = input.mtu.unwrap_or(current.mtu);
    if input.mtu.is_some() {
        validate::validate_mtu(&mut errors, "mtu", new_mtu);
    }
    errors.into_result()?;

    let referencing = refcheck::network_uuids_referencing_tag(kv, old_name).await;
    if new_name != old_name && !referencing.is_empty() {
        return Err(ApiError::in_use(
            format!("nic tag {old_name} is referenced by networks"),
            referencing,
        ));
    }
    if new_mtu < current.mtu {
        for net_uuid in &referencing {
            if let Ok(rec) = kv.get(NETWORKS_BUCKET, net_uuid).await {
                let net_mtu = rec.value.get("mtu").and_then(|v| v.as_u64()).unwrap_or(0);
                if net_mtu as u32 > new_mtu {
                    return Err(ApiError::invalid_param(
                        "mtu",
                        format!("network {net_uuid} requires a higher MTU"),
                    ));
                }
            }
        }
    }

    let updated = NicTag {
        uuid: current.uuid,
        name: new_name.clone(),
        mtu: new_mtu,
        etag: String::new(),
    };
    let value = serde_json::to_value(&updated).unwrap();

    if new_name == old_name {
        let etag = kv
            .put(
                NIC_TAGS_BUCKET,
                old_name,
                value,
                EtagCondition::MustMatch(current.etag),
                &[],
            )
            .await
            .map_err(map_kv_err)?;
        return Ok(NicTag { etag, ..updated });
    }

    let ops = vec![
        BatchOp::Delete {
            bucket: NIC_TAGS_BUCKET.to_string(),
            key: old_name.to_string(),
            cond: Some(current.etag),
        },
        BatchOp::Put {
            bucket: NIC_TAGS_BUCKET.to_string(),
            key: new_name.clone(),
            value,
            cond: EtagCondition::MustNotExist,
            unique_fields: vec![],
        },
    ];
    kv.batch(ops).await.map_err(map_kv_err)?;
    get(kv, &new_name).await
}

pub async fn delete(kv: &dyn KvStore, name: &str) -> Result<()> {
    if name == RESERVED_ADMIN_TAG {
        return Err(ApiError::invalid_param(
            "name",
            "the admin nic tag cannot be deleted",
        ));
    }
    let referencing = refcheck::network_uuids_referencing_tag(kv, name).await;
    if !referencing.is_empty() {
        return Err(ApiError::in_use(
            format!("nic tag {name} is referenced by networks"),
            referencing,
        ));
    }
    match kv.delete(NIC_TAGS_BUCKET, name, None).await {
        Ok(()) | Err(crate::kv::KvError::NotFound) => Ok(()),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

fn map_kv_err(e: crate::kv::KvError) -> ApiError {
    match e {
        crate::kv::KvError::EtagConflict => ApiError::EtagConflict,
        crate::kv::KvError::NotFound => ApiError::NotFound("nic tag".to_string()),
        other => ApiError::Internal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let kv = MemoryKv::new();
        let created = create(
            &kv,
            CreateNicTag {
                name: Some("external_1".into()),
                mtu: Some(1500),
            },
        )
        .await
        .unwrap();
        let fetched = get(&kv, "external_1").await.unwrap();
        assert_eq!(created.uuid, fetched.uuid);
    }

    #[tokio::test]
    async fn admin_tag_mtu_locked() {
        let kv = MemoryKv::new();
        let err = create(
            &kv,
            CreateNicTag {
                name: Some(RESERVED_ADMIN_TAG.to_string()),
                mtu: Some(9000),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidParameters { .. }));
    }

    #[tokio::test]
    async fn duplicate_name_rejected() {
        let kv = MemoryKv::new();
        create(
            &kv,
            CreateNicTag {
                name: Some("dup".into()),
                mtu: None,
            },
        )
        .await
        .unwrap();
        let err = create(
            &kv,
            CreateNicTag {
                name: Some("dup".into()),
                mtu: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidParameters { .. }));
    }

    #[tokio::test]
    async fn rename_moves_key() {
        let kv = MemoryKv::new();
        create(
            &kv,
            CreateNicTag {
                name: Some("old_name".into()),
                mtu: None,
            },
        )
        .await
        .unwrap();
        update(
            &kv,
            "old_name",
            UpdateNicTag {
                name: Some("new_name".into()),
                mtu: None,
            },
        )
        .await
        .unwrap();
        assert!(get(&kv, "old_name").await.is_err());
        assert!(get(&kv, "new_name").await.is_ok());
    }
}
