//! HTTP-level integration tests, spun up with `axum::serve` against an
//! ephemeral port and driven with `reqwest` — the same shape as the
//! teacher's `tests/rest_api.rs`.

use napi::audit::AuditLog;
use napi::events::CHANNEL_CAPACITY;
use napi::kv::MemoryKv;
use napi::overlay::{InMemoryOverlaySink, LoggingShootdownSink};
use napi::rest::state::AppState;
use napi_core::ValidationContext;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

async fn spawn_server() -> (String, Uuid) {
    let admin_uuid = Uuid::new_v4();
    let (events_tx, _rx) = tokio::sync::broadcast::channel(CHANNEL_CAPACITY);
    let state = Arc::new(AppState {
        kv: Arc::new(MemoryKv::new()),
        ctx: ValidationContext {
            admin_uuid,
            fabrics_enabled: true,
        },
        underlay_tag: "underlay".to_string(),
        overlay: Arc::new(InMemoryOverlaySink::new()),
        shootdown: Arc::new(LoggingShootdownSink),
        audit: AuditLog::new(),
        events_tx,
    });
    let app = napi::rest::routes::build(state);

    let port = portpicker::pick_unused_port().expect("no free port");
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://127.0.0.1:{port}"), admin_uuid)
}

async fn create_tag(client: &reqwest::Client, base: &str, name: &str) {
    let resp = client
        .post(format!("{base}/nic_tags"))
        .json(&json!({ "name": name }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "{:?}", resp.text().await);
}

async fn create_network(client: &reqwest::Client, base: &str, name: &str, nic_tag: &str) -> Value {
    let resp = client
        .post(format!("{base}/networks"))
        .json(&json!({
            "name": name,
            "nic_tag": nic_tag,
            "subnet": "10.50.0.0/24",
            "provision_start_ip": "10.50.0.10",
            "provision_end_ip": "10.50.0.20",
            "gateway": "10.50.0.1",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "{:?}", resp.text().await);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn s1_gateway_reserved_at_creation() {
    let (base, _admin) = spawn_server().await;
    let client = reqwest::Client::new();
    create_tag(&client, &base, "s1_tag").await;
    let net = create_network(&client, &base, "s1_net", "s1_tag").await;
    let uuid = net["uuid"].as_str().unwrap();

    let resp = client
        .get(format!("{base}/networks/{uuid}/ips/10.50.0.1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let ip: Value = resp.json().await.unwrap();
    assert_eq!(ip["reserved"], json!(true));
    assert_eq!(ip["belongs_to_uuid"], Value::Null);
    assert_eq!(ip["belongs_to_type"], json!("other"));
    assert_eq!(ip["free"], json!(false));
}

#[tokio::test]
async fn s2_next_free_allocation_and_reuse_after_delete() {
    let (base, admin) = spawn_server().await;
    let client = reqwest::Client::new();
    create_tag(&client, &base, "s2_tag").await;
    let net = create_network(&client, &base, "s2_net", "s2_tag").await;
    let uuid = net["uuid"].as_str().unwrap().to_string();

    let belongs_to = Uuid::new_v4();
    let nic_resp = client
        .post(format!("{base}/networks/{uuid}/nics"))
        .json(&json!({
            "owner_uuid": admin,
            "belongs_to_uuid": belongs_to,
            "belongs_to_type": "zone",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(nic_resp.status(), 200, "{:?}", nic_resp.text().await);
    let nic: Value = nic_resp.json().await.unwrap();
    let first_ip = nic["ip"].as_str().unwrap().to_string();
    assert_eq!(first_ip, "10.50.0.10");

    let mac = nic["mac"].as_u64().unwrap();
    let del = client
        .delete(format!("{base}/nics/{mac}"))
        .send()
        .await
        .unwrap();
    assert_eq!(del.status(), 204);

    let second_belongs_to = Uuid::new_v4();
    let nic2_resp = client
        .post(format!("{base}/networks/{uuid}/nics"))
        .json(&json!({
            "owner_uuid": admin,
            "belongs_to_uuid": second_belongs_to,
            "belongs_to_type": "zone",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(nic2_resp.status(), 200);
    let nic2: Value = nic2_resp.json().await.unwrap();
    assert_eq!(nic2["ip"].as_str().unwrap(), "10.50.0.10");
}

#[tokio::test]
async fn referential_integrity_chain() {
    let (base, admin) = spawn_server().await;
    let client = reqwest::Client::new();
    create_tag(&client, &base, "chain_tag").await;
    let net = create_network(&client, &base, "chain_net", "chain_tag").await;
    let uuid = net["uuid"].as_str().unwrap().to_string();

    let tag_delete = client
        .delete(format!("{base}/nic_tags/chain_tag"))
        .send()
        .await
        .unwrap();
    assert_eq!(tag_delete.status(), 409);

    let belongs_to = Uuid::new_v4();
    let nic_resp = client
        .post(format!("{base}/networks/{uuid}/nics"))
        .json(&json!({
            "owner_uuid": admin,
            "belongs_to_uuid": belongs_to,
            "belongs_to_type": "zone",
        }))
        .send()
        .await
        .unwrap();
    let nic: Value = nic_resp.json().await.unwrap();
    let mac = nic["mac"].as_u64().unwrap();

    let net_delete = client.delete(format!("{base}/networks/{uuid}")).send().await.unwrap();
    assert_eq!(net_delete.status(), 409);

    let nic_delete = client.delete(format!("{base}/nics/{mac}")).send().await.unwrap();
    assert_eq!(nic_delete.status(), 204);

    let net_delete2 = client.delete(format!("{base}/networks/{uuid}")).send().await.unwrap();
    assert_eq!(net_delete2.status(), 204);

    let tag_delete2 = client
        .delete(format!("{base}/nic_tags/chain_tag"))
        .send()
        .await
        .unwrap();
    assert_eq!(tag_delete2.status(), 204);
}

#[tokio::test]
async fn immutable_field_rejected_on_update() {
    let (base, _admin) = spawn_server().await;
    let client = reqwest::Client::new();
    create_tag(&client, &base, "immut_tag").await;
    let net = create_network(&client, &base, "immut_net", "immut_tag").await;
    let uuid = net["uuid"].as_str().unwrap();

    let resp = client
        .put(format!("{base}/networks/{uuid}"))
        .json(&json!({ "name": "renamed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "{:?}", resp.text().await);

    let rejected = client
        .put(format!("{base}/networks/{uuid}"))
        .json(&json!({ "vlan_id": 99 }))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 422, "{:?}", rejected.text().await);
}

#[tokio::test]
async fn subnet_overlap_rejected_outside_private_ranges() {
    let (base, _admin) = spawn_server().await;
    let client = reqwest::Client::new();
    create_tag(&client, &base, "ov_tag").await;

    let first = client
        .post(format!("{base}/networks"))
        .json(&json!({
            "name": "ov_net_1",
            "nic_tag": "ov_tag",
            "subnet": "203.0.113.0/24",
            "provision_start_ip": "203.0.113.10",
            "provision_end_ip": "203.0.113.20",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200, "{:?}", first.text().await);

    let second = client
        .post(format!("{base}/networks"))
        .json(&json!({
            "name": "ov_net_2",
            "nic_tag": "ov_tag",
            "subnet": "203.0.113.128/25",
            "provision_start_ip": "203.0.113.130",
            "provision_end_ip": "203.0.113.140",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 422);
}

#[tokio::test]
async fn provision_nic_through_pool() {
    let (base, admin) = spawn_server().await;
    let client = reqwest::Client::new();
    create_tag(&client, &base, "pool_tag").await;
    let net = create_network(&client, &base, "pool_net", "pool_tag").await;
    let net_uuid = net["uuid"].as_str().unwrap().to_string();

    let pool_resp = client
        .post(format!("{base}/network_pools"))
        .json(&json!({
            "name": "pool_through_test",
            "networks": [net_uuid],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(pool_resp.status(), 200, "{:?}", pool_resp.text().await);
    let pool: Value = pool_resp.json().await.unwrap();
    let pool_uuid = pool["uuid"].as_str().unwrap();

    let belongs_to = Uuid::new_v4();
    let nic_resp = client
        .post(format!("{base}/network_pools/{pool_uuid}/nics"))
        .json(&json!({
            "owner_uuid": admin,
            "belongs_to_uuid": belongs_to,
            "belongs_to_type": "zone",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(nic_resp.status(), 200, "{:?}", nic_resp.text().await);
    let nic: Value = nic_resp.json().await.unwrap();
    assert_eq!(nic["network_uuid"].as_str().unwrap(), net_uuid);
    assert_eq!(nic["ip"].as_str().unwrap(), "10.50.0.10");
}
