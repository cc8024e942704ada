use crate::rest::state::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

/// `GET /ping` — liveness plus a snapshot of the running configuration.
#[utoipa::path(get, path = "/ping", responses((status = 200, description = "Service is alive")))]
pub async fn ping(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "config": {
            "fabrics_enabled": state.ctx.fabrics_enabled,
        }
    }))
}
