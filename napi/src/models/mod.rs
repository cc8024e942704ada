//! The five model modules (spec.md §9: "explicit model modules that depend
//! only downward on the `kv` module and a small `refcheck` module"), plus the
//! IP allocator and the referential-integrity helpers shared between them.

pub mod ip;
pub mod network;
pub mod nic;
pub mod nic_tag;
pub mod pool;
pub mod refcheck;

/// Bucket names. One flat bucket per resource, plus one IP sub-bucket per
/// network (`ip::bucket_for`).
pub const NIC_TAGS_BUCKET: &str = "napi_nic_tags";
pub const NETWORKS_BUCKET: &str = "napi_networks";
pub const POOLS_BUCKET: &str = "napi_network_pools";
pub const NICS_BUCKET: &str = "napi_nics";

pub const RESERVED_ADMIN_TAG: &str = "admin";
pub const RESERVED_EXTERNAL_TAG: &str = "external";

/// VXLAN default port, used for underlay-mapping records (spec.md §4.7).
pub const VXLAN_PORT: u16 = 4789;
