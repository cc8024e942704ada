//! Shared application state (spec.md §4.8/§4.9 "ambient additions"),
//! injected into every handler via `State<Arc<AppState>>`, the same pattern
//! the teacher wires `Arc<AppState>` with an `Arc<dyn DataStore>` inside.

use crate::audit::AuditLog;
use crate::events::ChangeEvent;
use crate::kv::KvStore;
use crate::overlay::{OverlayMappingSink, ShootdownSink};
use napi_core::ValidationContext;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct AppState {
    pub kv: Arc<dyn KvStore>,
    pub ctx: ValidationContext,
    pub underlay_tag: String,
    pub overlay: Arc<dyn OverlayMappingSink>,
    pub shootdown: Arc<dyn ShootdownSink>,
    pub audit: AuditLog,
    pub events_tx: broadcast::Sender<ChangeEvent>,
}

impl AppState {
    pub fn nic_deps(&self) -> crate::models::nic::NicDeps<'_> {
        crate::models::nic::NicDeps {
            underlay_tag: &self.underlay_tag,
            overlay: self.overlay.as_ref(),
            shootdown: self.shootdown.as_ref(),
            admin_uuid: self.ctx.admin_uuid,
        }
    }
}
