//! Core types shared across the IPAM control plane: the error taxonomy, the
//! validation kernel, and address-family helpers. No HTTP, no storage —
//! those live in the `napi` crate.

pub mod addr;
pub mod error;
pub mod validate;

pub use addr::Family;
pub use error::{ApiError, FieldError, FieldErrorCode, Result, ValidationErrors};
pub use validate::ValidationContext;
