//! Process configuration (spec.md §2, §9 "admin-owner shortcut" and
//! "'Infinity' retry setting"), matching the teacher's `Args` struct in
//! `main.rs` via `clap`'s derive `Parser`.

use clap::Parser;
use uuid::Uuid;

#[derive(Debug, Clone, Parser)]
#[command(name = "napi", about = "IPAM control plane")]
pub struct Args {
    /// Address to bind the HTTP listener to.
    #[arg(long, env = "NAPI_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// The UUID treated as the implicit owner of every network/pool.
    #[arg(long, env = "NAPI_ADMIN_UUID")]
    pub admin_uuid: Uuid,

    /// Enable fabric (overlay) network support.
    #[arg(long, env = "NAPI_FABRICS_ENABLED", default_value_t = false)]
    pub fabrics_enabled: bool,

    /// NIC tag name reserved for underlay NICs.
    #[arg(long, env = "NAPI_UNDERLAY_TAG", default_value = "underlay")]
    pub underlay_tag: String,

    /// Bounded retry cap for etag-conflict and allocation-contention
    /// retries (spec.md §9: never a literal infinite loop).
    #[arg(long, env = "NAPI_ALLOCATION_RETRIES", default_value_t = 10)]
    pub allocation_retries: u32,

    /// `RUST_LOG`-style filter directive; falls back to `info` when unset.
    #[arg(long, env = "NAPI_LOG_FILTER", default_value = "info")]
    pub log_filter: String,
}
