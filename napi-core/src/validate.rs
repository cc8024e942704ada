//! Typed field validators with per-field error accumulation (spec.md §4.1).
//!
//! The source's validation kernel is a dynamic schema-and-hooks engine; the
//! idiomatic Rust shape keeps the same two ideas — validators never abort
//! early, and cross-field checks ("after" hooks) run only once every field
//! they depend on parsed cleanly — but expresses them as plain typed
//! functions plus a `ValidationErrors` accumulator (see `error.rs`) instead
//! of a dynamic schema object.

use crate::error::{FieldError, FieldErrorCode, ValidationErrors};
use ipnet::IpNet;
use std::net::IpAddr;
use uuid::Uuid;

/// Context threaded through every validation pass: the admin owner shortcut
/// and whether fabrics are enabled for this deployment (spec.md §9 "Admin-
/// owner shortcut" — passed explicitly, never read from a global).
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub admin_uuid: Uuid,
    pub fabrics_enabled: bool,
}

impl ValidationContext {
    pub fn is_admin(&self, owner: &Uuid) -> bool {
        owner == &self.admin_uuid
    }
}

/// Require a field to be present, recording `MissingParameter` otherwise.
pub fn require<'a, T>(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<&'a T>,
) -> Option<&'a T> {
    match value {
        Some(v) => Some(v),
        None => {
            errors.push(FieldError::new(
                field,
                FieldErrorCode::MissingParameter,
                format!("{field} is required"),
            ));
            None
        }
    }
}

/// Validate a name: 1-31 chars, `[A-Za-z0-9_]` only (spec.md §3, NIC tag
/// names; reused for the same character class elsewhere).
pub fn validate_tag_name(errors: &mut ValidationErrors, field: &str, name: &str) -> bool {
    let ok = !name.is_empty()
        && name.len() <= 31
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !ok {
        errors.push(
            FieldError::new(
                field,
                FieldErrorCode::InvalidParameter,
                "must be 1-31 characters of [A-Za-z0-9_]",
            )
            .with_invalid(name),
        );
    }
    ok
}

/// Validate an MTU value: 1500-9000 inclusive (spec.md §3).
pub fn validate_mtu(errors: &mut ValidationErrors, field: &str, mtu: u32) -> bool {
    let ok = (1500..=9000).contains(&mtu);
    if !ok {
        errors.push(
            FieldError::new(field, FieldErrorCode::InvalidParameter, "must be 1500-9000")
                .with_invalid(mtu.to_string()),
        );
    }
    ok
}

/// Validate a VLAN id: 0 or 2-4094; 1 is explicitly forbidden (spec.md §3).
pub fn validate_vlan_id(errors: &mut ValidationErrors, field: &str, vlan_id: u16) -> bool {
    let ok = vlan_id == 0 || (2..=4094).contains(&vlan_id);
    if !ok {
        errors.push(
            FieldError::new(
                field,
                FieldErrorCode::InvalidParameter,
                "must be 0 or 2-4094 (1 is reserved)",
            )
            .with_invalid(vlan_id.to_string()),
        );
    }
    ok
}

/// Validate a vnet_id: 0..2^24-1 (spec.md §3, fabrics only).
pub fn validate_vnet_id(errors: &mut ValidationErrors, field: &str, vnet_id: u32) -> bool {
    let ok = vnet_id < (1 << 24);
    if !ok {
        errors.push(
            FieldError::new(field, FieldErrorCode::InvalidParameter, "must be < 2^24")
                .with_invalid(vnet_id.to_string()),
        );
    }
    ok
}

/// Parse a UUID field, recording `InvalidParameter` on failure.
pub fn parse_uuid(errors: &mut ValidationErrors, field: &str, raw: &str) -> Option<Uuid> {
    match Uuid::parse_str(raw) {
        Ok(u) => Some(u),
        Err(_) => {
            errors.push(
                FieldError::new(field, FieldErrorCode::InvalidParameter, "must be a UUID")
                    .with_invalid(raw),
            );
            None
        }
    }
}

/// Parse an IP address field.
pub fn parse_ip(errors: &mut ValidationErrors, field: &str, raw: &str) -> Option<IpAddr> {
    match raw.parse::<IpAddr>() {
        Ok(ip) => Some(ip),
        Err(_) => {
            errors.push(
                FieldError::new(
                    field,
                    FieldErrorCode::InvalidParameter,
                    "must be a valid IP address",
                )
                .with_invalid(raw),
            );
            None
        }
    }
}

/// Parse a CIDR subnet field.
pub fn parse_subnet(errors: &mut ValidationErrors, field: &str, raw: &str) -> Option<IpNet> {
    match raw.parse::<IpNet>() {
        Ok(net) => Some(net),
        Err(_) => {
            errors.push(
                FieldError::new(
                    field,
                    FieldErrorCode::InvalidParameter,
                    "must be a valid CIDR subnet",
                )
                .with_invalid(raw),
            );
            None
        }
    }
}

/// Bounded array length check (spec.md §3 network pools: "networks[1..64]").
pub fn validate_len(
    errors: &mut ValidationErrors,
    field: &str,
    len: usize,
    min: usize,
    max: usize,
) -> bool {
    let ok = len >= min && len <= max;
    if !ok {
        errors.push(FieldError::new(
            field,
            FieldErrorCode::InvalidParameter,
            format!("must have between {min} and {max} entries"),
        ));
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_name_rules() {
        let mut errs = ValidationErrors::new();
        assert!(validate_tag_name(&mut errs, "name", "external_1"));
        assert!(errs.is_empty());

        let mut errs = ValidationErrors::new();
        assert!(!validate_tag_name(&mut errs, "name", "has space"));
        assert!(errs.has_field("name"));
    }

    #[test]
    fn vlan_rules() {
        let mut errs = ValidationErrors::new();
        assert!(!validate_vlan_id(&mut errs, "vlan_id", 1));
        assert!(errs.has_field("vlan_id"));

        let mut errs = ValidationErrors::new();
        assert!(validate_vlan_id(&mut errs, "vlan_id", 0));
        assert!(validate_vlan_id(&mut errs, "vlan_id", 4094));
    }

    #[test]
    fn errors_sort_by_field() {
        let mut errs = ValidationErrors::new();
        errs.push(FieldError::new("zeta", FieldErrorCode::InvalidParameter, "x"));
        errs.push(FieldError::new("alpha", FieldErrorCode::InvalidParameter, "y"));
        let sorted = errs.into_inner();
        assert_eq!(sorted[0].field, "alpha");
        assert_eq!(sorted[1].field, "zeta");
    }
}
