//! Overlay-mapping and shootdown sinks (spec.md §4.8): the NIC model's
//! side effects modeled as small traits so they're testable without a real
//! overlay store, injected into `AppState` the way the teacher injects
//! `audit: Arc<ApiAuditLogger>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverlayMapping {
    pub cn_uuid: Uuid,
    pub ip: IpAddr,
    pub mac: u64,
    pub vnet_id: u32,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnderlayMapping {
    pub cn_uuid: Uuid,
    pub ip: IpAddr,
    pub port: u16,
}

#[async_trait]
pub trait OverlayMappingSink: Send + Sync {
    async fn upsert(&self, record: OverlayMapping);
    async fn delete_marker(&self, record: OverlayMapping);
    async fn upsert_underlay(&self, record: UnderlayMapping);
    async fn remove_underlay(&self, cn_uuid: Uuid);
}

#[async_trait]
pub trait ShootdownSink: Send + Sync {
    async fn notify(&self, vnet_id: u32, cn_uuid: Uuid);
}

/// In-memory overlay sink for tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryOverlaySink {
    mappings: Mutex<Vec<OverlayMapping>>,
    underlay: Mutex<Vec<UnderlayMapping>>,
}

impl InMemoryOverlaySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mappings(&self) -> Vec<OverlayMapping> {
        self.mappings.lock().unwrap().clone()
    }

    pub fn underlay_mappings(&self) -> Vec<UnderlayMapping> {
        self.underlay.lock().unwrap().clone()
    }
}

#[async_trait]
impl OverlayMappingSink for InMemoryOverlaySink {
    async fn upsert(&self, record: OverlayMapping) {
        tracing::info!(target: "overlay_mapping", cn_uuid = %record.cn_uuid, ip = %record.ip, vnet_id = record.vnet_id, "overlay mapping upsert");
        self.mappings.lock().unwrap().push(record);
    }

    async fn delete_marker(&self, record: OverlayMapping) {
        tracing::info!(target: "overlay_mapping", cn_uuid = %record.cn_uuid, ip = %record.ip, vnet_id = record.vnet_id, "overlay mapping delete marker");
        self.mappings.lock().unwrap().push(record);
    }

    async fn upsert_underlay(&self, record: UnderlayMapping) {
        tracing::info!(target: "underlay_mapping", cn_uuid = %record.cn_uuid, ip = %record.ip, "underlay mapping upsert");
        self.underlay.lock().unwrap().push(record);
    }

    async fn remove_underlay(&self, cn_uuid: Uuid) {
        tracing::info!(target: "underlay_mapping", %cn_uuid, "underlay mapping removed");
        self.underlay.lock().unwrap().retain(|m| m.cn_uuid != cn_uuid);
    }
}

/// Logs one structured line per compute node in the vnet; this is the VL2
/// shootdown event in a system without a separate messaging fabric.
#[derive(Default)]
pub struct LoggingShootdownSink;

#[async_trait]
impl ShootdownSink for LoggingShootdownSink {
    async fn notify(&self, vnet_id: u32, cn_uuid: Uuid) {
        tracing::info!(target: "vl2_shootdown", vnet_id, %cn_uuid, "vl2 shootdown");
    }
}
