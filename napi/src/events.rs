//! Change-notification publisher (spec.md §4.9), mirroring the teacher's
//! `broadcast::channel::<Event>(256)` in `main.rs`.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    NicTag,
    Network,
    Pool,
    Nic,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub resource: Resource,
    pub id: String,
}

pub const CHANNEL_CAPACITY: usize = 256;

pub fn publish(tx: &tokio::sync::broadcast::Sender<ChangeEvent>, event: ChangeEvent) {
    // No subscribers yet (no HTTP subscribe endpoint, spec.md §4.9) is not
    // an error; `send` only fails when the channel has zero receivers.
    let _ = tx.send(event);
}
