//! In-memory reference implementation of [`KvStore`].
//!
//! This is the adapter the whole service runs against in this repo (spec.md
//! §1 treats the real transactional store as an external collaborator).
//! Etags are opaque monotonically-increasing tokens, the same role a
//! Moray/PostgreSQL revision column would play; CAS correctness only depends
//! on etags being comparable for equality, never on their internal shape.
//!
//! Atomicity for `batch` is achieved by staging every op against a full
//! clone of the bucket map and only swapping it in if every op validates —
//! acceptable for an in-process reference store where the whole map fits in
//! memory; a real adapter would use the backing store's own transaction.

use super::{BatchOp, EtagCondition, Filter, FindOptions, KvError, KvResult, KvStore, Record};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredRecord {
    value: Value,
    etag: String,
}

type BucketMap = BTreeMap<String, StoredRecord>;

#[derive(Default)]
pub struct MemoryKv {
    buckets: RwLock<HashMap<String, BucketMap>>,
    next_etag: AtomicU64,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            next_etag: AtomicU64::new(1),
        }
    }

    fn gen_etag(&self) -> String {
        let n = self.next_etag.fetch_add(1, Ordering::SeqCst);
        format!("e{n}")
    }

    fn check_unique(
        map: &BucketMap,
        key: &str,
        value: &Value,
        unique_fields: &[&str],
    ) -> KvResult<()> {
        for field in unique_fields {
            let Some(want) = value.get(field) else {
                continue;
            };
            for (other_key, other) in map.iter() {
                if other_key == key {
                    continue;
                }
                if other.value.get(*field) == Some(want) {
                    return Err(KvError::UniqueAttribute((*field).to_string()));
                }
            }
        }
        Ok(())
    }

    fn apply_put(
        map: &mut BucketMap,
        key: &str,
        value: Value,
        cond: &EtagCondition,
        unique_fields: &[&str],
        etag: String,
    ) -> KvResult<()> {
        match cond {
            EtagCondition::MustNotExist => {
                if map.contains_key(key) {
                    return Err(KvError::EtagConflict);
                }
            }
            EtagCondition::MustMatch(expected) => match map.get(key) {
                Some(existing) if &existing.etag == expected => {}
                _ => return Err(KvError::EtagConflict),
            },
            EtagCondition::Any => {}
        }
        Self::check_unique(map, key, &value, unique_fields)?;
        map.insert(key.to_string(), StoredRecord { value, etag });
        Ok(())
    }

    fn apply_delete(map: &mut BucketMap, key: &str, cond: &Option<String>) -> KvResult<()> {
        match map.get(key) {
            None => Err(KvError::NotFound),
            Some(existing) => {
                if let Some(expected) = cond {
                    if &existing.etag != expected {
                        return Err(KvError::EtagConflict);
                    }
                }
                map.remove(key);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, bucket: &str, key: &str) -> KvResult<Record> {
        let buckets = self.buckets.read().await;
        let map = buckets.get(bucket).ok_or(KvError::NotFound)?;
        let rec = map.get(key).ok_or(KvError::NotFound)?;
        Ok(Record {
            value: rec.value.clone(),
            etag: rec.etag.clone(),
        })
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        value: Value,
        cond: EtagCondition,
        unique_fields: &[&str],
    ) -> KvResult<String> {
        let etag = self.gen_etag();
        let mut buckets = self.buckets.write().await;
        let map = buckets.entry(bucket.to_string()).or_default();
        Self::apply_put(map, key, value, &cond, unique_fields, etag.clone())?;
        Ok(etag)
    }

    async fn delete(&self, bucket: &str, key: &str, cond: Option<String>) -> KvResult<()> {
        let mut buckets = self.buckets.write().await;
        let map = buckets
            .get_mut(bucket)
            .ok_or(KvError::BucketNotFound(bucket.to_string()))?;
        Self::apply_delete(map, key, &cond)
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> KvResult<()> {
        let mut buckets = self.buckets.write().await;
        let mut scratch = buckets.clone();

        for op in &ops {
            match op {
                BatchOp::Put {
                    bucket,
                    key,
                    value,
                    cond,
                    unique_fields,
                } => {
                    let map = scratch.entry(bucket.clone()).or_default();
                    let refs: Vec<&str> = unique_fields.iter().map(String::as_str).collect();
                    let etag = self.gen_etag();
                    Self::apply_put(map, key, value.clone(), cond, &refs, etag)?;
                }
                BatchOp::Delete { bucket, key, cond } => {
                    let map = scratch
                        .get_mut(bucket)
                        .ok_or_else(|| KvError::BucketNotFound(bucket.clone()))?;
                    Self::apply_delete(map, key, cond)?;
                }
            }
        }

        *buckets = scratch;
        Ok(())
    }

    async fn find(
        &self,
        bucket: &str,
        filter: Filter,
        opts: FindOptions,
    ) -> KvResult<Vec<(String, Record)>> {
        let buckets = self.buckets.read().await;
        let Some(map) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<(String, Record)> = map
            .iter()
            .filter(|(_, rec)| filter.matches(&rec.value))
            .map(|(k, rec)| {
                (
                    k.clone(),
                    Record {
                        value: rec.value.clone(),
                        etag: rec.etag.clone(),
                    },
                )
            })
            .collect();
        if opts.offset > 0 {
            out = out.into_iter().skip(opts.offset).collect();
        }
        if let Some(limit) = opts.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn init_bucket(&self, bucket: &str) {
        let mut buckets = self.buckets.write().await;
        buckets.entry(bucket.to_string()).or_default();
    }

    async fn delete_bucket(&self, bucket: &str) -> KvResult<()> {
        let mut buckets = self.buckets.write().await;
        buckets.remove(bucket);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_requires_etag_null_for_creation() {
        let kv = MemoryKv::new();
        kv.put("b", "k1", json!({"a": 1}), EtagCondition::MustNotExist, &[])
            .await
            .unwrap();
        let err = kv
            .put("b", "k1", json!({"a": 2}), EtagCondition::MustNotExist, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, KvError::EtagConflict));
    }

    #[tokio::test]
    async fn cas_put_requires_matching_etag() {
        let kv = MemoryKv::new();
        let etag = kv
            .put("b", "k1", json!({"a": 1}), EtagCondition::MustNotExist, &[])
            .await
            .unwrap();
        let err = kv
            .put(
                "b",
                "k1",
                json!({"a": 2}),
                EtagCondition::MustMatch("stale".into()),
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KvError::EtagConflict));

        kv.put(
            "b",
            "k1",
            json!({"a": 2}),
            EtagCondition::MustMatch(etag),
            &[],
        )
        .await
        .unwrap();
        let rec = kv.get("b", "k1").await.unwrap();
        assert_eq!(rec.value, json!({"a": 2}));
    }

    #[tokio::test]
    async fn unique_field_rejected() {
        let kv = MemoryKv::new();
        kv.put(
            "b",
            "k1",
            json!({"name_str": "global:foo"}),
            EtagCondition::MustNotExist,
            &["name_str"],
        )
        .await
        .unwrap();
        let err = kv
            .put(
                "b",
                "k2",
                json!({"name_str": "global:foo"}),
                EtagCondition::MustNotExist,
                &["name_str"],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KvError::UniqueAttribute(f) if f == "name_str"));
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let kv = MemoryKv::new();
        kv.put("b", "k1", json!({"a": 1}), EtagCondition::MustNotExist, &[])
            .await
            .unwrap();

        let ops = vec![
            BatchOp::Delete {
                bucket: "b".into(),
                key: "k1".into(),
                cond: None,
            },
            BatchOp::Put {
                bucket: "b".into(),
                key: "k1".into(),
                value: json!({"a": 99}),
                cond: EtagCondition::MustMatch("nonexistent".into()),
                unique_fields: vec![],
            },
        ];
        let err = kv.batch(ops).await.unwrap_err();
        assert!(matches!(err, KvError::EtagConflict));

        // k1 must still exist, unaffected by the aborted batch.
        let rec = kv.get("b", "k1").await.unwrap();
        assert_eq!(rec.value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn rename_batch_delete_old_put_new() {
        let kv = MemoryKv::new();
        kv.put("b", "old", json!({"n": "old"}), EtagCondition::MustNotExist, &[])
            .await
            .unwrap();

        let ops = vec![
            BatchOp::Delete {
                bucket: "b".into(),
                key: "old".into(),
                cond: None,
            },
            BatchOp::Put {
                bucket: "b".into(),
                key: "new".into(),
                value: json!({"n": "new"}),
                cond: EtagCondition::MustNotExist,
                unique_fields: vec![],
            },
        ];
        kv.batch(ops).await.unwrap();

        assert!(matches!(kv.get("b", "old").await, Err(KvError::NotFound)));
        assert_eq!(kv.get("b", "new").await.unwrap().value, json!({"n": "new"}));
    }
}
