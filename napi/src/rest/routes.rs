use crate::rest::handlers::{ips, nic_tags, nics, networks, ping, pools};
use crate::rest::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(paths(
    ping::ping,
    nic_tags::list,
    nic_tags::create,
    nic_tags::get,
    nic_tags::update,
    nic_tags::delete,
    networks::list,
    networks::create,
    networks::get,
    networks::update,
    networks::delete,
    networks::provision_nic,
    ips::list,
    ips::get,
    ips::put,
    pools::list,
    pools::create,
    pools::get,
    pools::update,
    pools::delete,
    pools::provision_nic,
    nics::list,
    nics::create,
    nics::get,
    nics::update,
    nics::delete,
))]
struct ApiDoc;

pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(ping::ping))
        .route("/nic_tags", get(nic_tags::list).post(nic_tags::create))
        .route(
            "/nic_tags/{name}",
            get(nic_tags::get).put(nic_tags::update).delete(nic_tags::delete),
        )
        .route("/networks", get(networks::list).post(networks::create))
        .route(
            "/networks/{uuid}",
            get(networks::get).put(networks::update).delete(networks::delete),
        )
        .route("/networks/{uuid}/ips", get(ips::list))
        .route("/networks/{uuid}/ips/{addr}", get(ips::get).put(ips::put))
        .route("/networks/{uuid}/nics", post(networks::provision_nic))
        .route("/network_pools", get(pools::list).post(pools::create))
        .route(
            "/network_pools/{uuid}",
            get(pools::get).put(pools::update).delete(pools::delete),
        )
        .route("/network_pools/{uuid}/nics", post(pools::provision_nic))
        .route("/nics", get(nics::list).post(nics::create))
        .route("/nics/{mac}", get(nics::get).put(nics::update).delete(nics::delete))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

