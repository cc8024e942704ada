pub mod ips;
pub mod nic_tags;
pub mod nics;
pub mod networks;
pub mod ping;
pub mod pools;

use axum::http::HeaderMap;
use uuid::Uuid;

/// Pulls `x-request-id` off the request, generating one otherwise (spec.md
/// §3's request/audit envelope). Used for log correlation only.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
}
