//! The narrow KV adapter contract (spec.md §4.2): `get`, `put` with an etag
//! precondition, `delete`, an atomic `batch`, and `find` (the spec's
//! `findObjects`). This is the only interface the model layer is allowed to
//! use to reach storage — the trait is object-safe so `AppState` can hold an
//! `Arc<dyn KvStore>` exactly the way the teacher's `AppState` holds an
//! `Arc<dyn DataStore>` (`mvirt-api/src/rest/handlers.rs`).
//!
//! The reference implementation (`memory.rs`) is in-process and is the only
//! adapter this repo ships; a production deployment would implement this
//! same trait against Moray/PostgreSQL, which is out of scope here.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

pub use memory::MemoryKv;

/// A bucket name. Buckets are namespaced flat key-value collections; a
/// network's IP sub-bucket is named `napi_ips_<network_uuid>`.
pub type Bucket = String;

/// Precondition for a `put`, mirroring spec.md §4.2's `{etag: prev|null|any}`.
#[derive(Debug, Clone)]
pub enum EtagCondition {
    /// `etag: null` — demands creation; fails if the key already exists.
    MustNotExist,
    /// An explicit previous etag — demands CAS.
    MustMatch(String),
    /// No precondition; overwrite unconditionally.
    Any,
}

/// One row as returned by `get`/`find`: the JSON value and its opaque etag.
#[derive(Debug, Clone)]
pub struct Record {
    pub value: Value,
    pub etag: String,
}

/// A single operation inside an atomic `batch`.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put {
        bucket: Bucket,
        key: String,
        value: Value,
        cond: EtagCondition,
        /// Fields that must be unique within the bucket (spec.md §4.2's
        /// typed indexes); violating one maps to `KvError::UniqueAttribute`.
        unique_fields: Vec<String>,
    },
    Delete {
        bucket: Bucket,
        key: String,
        cond: Option<String>,
    },
}

/// Errors the adapter can produce; these map 1:1 onto `ApiError` in the
/// model layer (spec.md §7: "KV errors map by well-known ... causes").
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("not found")]
    NotFound,
    #[error("etag conflict")]
    EtagConflict,
    #[error("unique attribute violation on {0}")]
    UniqueAttribute(String),
    #[error("bucket not found: {0}")]
    BucketNotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type KvResult<T> = std::result::Result<T, KvError>;

/// A boolean filter tree over indexed fields (spec.md §4.2's LDAP-filter-like
/// `findObjects` filter): equality, presence, and array membership.
#[derive(Debug, Clone)]
pub enum Filter {
    Eq(String, Value),
    Present(String),
    /// True if the named field (an array in the stored value) contains `val`.
    Contains(String, Value),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    All,
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Filter {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, want) => field_value(value, field).is_some_and(|v| v == want),
            Filter::Present(field) => field_value(value, field).is_some(),
            Filter::Contains(field, want) => field_value(value, field)
                .and_then(|v| v.as_array())
                .is_some_and(|arr| arr.contains(want)),
            Filter::And(fs) => fs.iter().all(|f| f.matches(value)),
            Filter::Or(fs) => fs.iter().any(|f| f.matches(value)),
            Filter::Not(inner) => !inner.matches(value),
        }
    }
}

fn field_value<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    value.get(field)
}

/// Options for `find` (spec.md §4.2: `{limit, offset, sort}`). Results come
/// back in the adapter's native key order, which is lexicographic over the
/// stored string key, not necessarily numeric — callers that need address
/// order (the IP allocator) re-sort by the parsed `IpAddr` themselves.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub limit: Option<usize>,
    pub offset: usize,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> KvResult<Record>;

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        value: Value,
        cond: EtagCondition,
        unique_fields: &[&str],
    ) -> KvResult<String>;

    async fn delete(&self, bucket: &str, key: &str, cond: Option<String>) -> KvResult<()>;

    /// Execute every op atomically: all succeed, or none are applied.
    async fn batch(&self, ops: Vec<BatchOp>) -> KvResult<()>;

    /// Stream matching records in ascending key order.
    async fn find(&self, bucket: &str, filter: Filter, opts: FindOptions) -> KvResult<Vec<(String, Record)>>;

    /// Idempotently create a bucket (no-op for the in-memory adapter).
    async fn init_bucket(&self, bucket: &str);

    /// Delete an entire bucket, tolerating "does not exist" (spec.md §4.4
    /// delete: "tolerating bucket not found as benign").
    async fn delete_bucket(&self, bucket: &str) -> KvResult<()>;
}
