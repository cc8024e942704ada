//! Cross-model referential-integrity predicates (spec.md §9), kept in one
//! module so `nic_tag`, `network`, and `nic` never import each other
//! directly — each depends downward on this module instead.

use crate::kv::{Filter, FindOptions, KvStore};
use crate::models::{NETWORKS_BUCKET, NICS_BUCKET};

/// Networks whose `nic_tag` field names `tag_name`, sorted ascending by uuid.
pub async fn network_uuids_referencing_tag(kv: &dyn KvStore, tag_name: &str) -> Vec<String> {
    let rows = kv
        .find(
            NETWORKS_BUCKET,
            Filter::Eq("nic_tag".to_string(), serde_json::json!(tag_name)),
            FindOptions::default(),
        )
        .await
        .unwrap_or_default();
    let mut ids: Vec<String> = rows.into_iter().map(|(k, _)| k).collect();
    ids.sort();
    ids
}

/// MAC addresses (decimal string form, as stored) of NICs bound to
/// `network_uuid`, sorted ascending.
pub async fn nic_macs_referencing_network(kv: &dyn KvStore, network_uuid: &str) -> Vec<String> {
    let rows = kv
        .find(
            NICS_BUCKET,
            Filter::Eq(
                "network_uuid".to_string(),
                serde_json::json!(network_uuid),
            ),
            FindOptions::default(),
        )
        .await
        .unwrap_or_default();
    let mut macs: Vec<String> = rows.into_iter().map(|(k, _)| k).collect();
    macs.sort_by_key(|m| m.parse::<u64>().unwrap_or(0));
    macs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::models::nic::{BelongsToType, CreateNic, NicDeps};
    use crate::models::nic_tag::{self, CreateNicTag};
    use crate::overlay::{InMemoryOverlaySink, LoggingShootdownSink};
    use uuid::Uuid;

    #[tokio::test]
    async fn nic_macs_referencing_network_sorted_numerically() {
        let kv = MemoryKv::new();
        nic_tag::create(&kv, CreateNicTag { name: Some("refcheck_tag".into()), mtu: Some(1500) })
            .await
            .unwrap();
        let net = crate::models::network::create(
            &kv,
            &napi_core::ValidationContext { admin_uuid: Uuid::new_v4(), fabrics_enabled: true },
            crate::models::network::CreateNetwork {
                name: Some("refcheck_net".into()),
                nic_tag: Some("refcheck_tag".into()),
                subnet: Some("10.30.0.0/24".into()),
                provision_start_ip: Some("10.30.0.10".into()),
                provision_end_ip: Some("10.30.0.20".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let overlay = InMemoryOverlaySink::new();
        let shootdown = LoggingShootdownSink;
        let deps = NicDeps {
            underlay_tag: "underlay",
            overlay: &overlay,
            shootdown: &shootdown,
            admin_uuid: Uuid::new_v4(),
        };
        for mac in ["2", "10", "100"] {
            crate::models::nic::create(
                &kv,
                &deps,
                CreateNic {
                    mac: Some(mac.into()),
                    owner_uuid: Some(Uuid::new_v4().to_string()),
                    belongs_to_uuid: Some(Uuid::new_v4().to_string()),
                    belongs_to_type: Some(BelongsToType::Zone),
                    network_uuid: Some(net.uuid.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }

        let macs = nic_macs_referencing_network(&kv, &net.uuid.to_string()).await;
        assert_eq!(macs, vec!["2".to_string(), "10".to_string(), "100".to_string()]);
    }
}
