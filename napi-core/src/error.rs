//! The error taxonomy shared by every model in the IPAM control plane.
//!
//! This mirrors the `StoreError` / `ApiError` split the teacher uses: a small
//! `thiserror` enum names the kinds of failure a model can produce, and the
//! HTTP layer (in the `napi` crate) maps each variant to a status code and a
//! JSON envelope. Field-level validation failures accumulate into
//! `ApiError::InvalidParameters` rather than aborting on the first bad field.

use serde::Serialize;
use std::fmt;

/// A single field-level validation failure.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub code: FieldErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid: Option<String>,
}

impl FieldError {
    pub fn new(field: impl Into<String>, code: FieldErrorCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
            invalid: None,
        }
    }

    pub fn with_invalid(mut self, invalid: impl Into<String>) -> Self {
        self.invalid = Some(invalid.into());
        self
    }
}

/// Sub-codes for `InvalidParameters` field errors (spec.md §4.1 / §7).
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum FieldErrorCode {
    MissingParameter,
    InvalidParameter,
    DuplicateParameter,
    UsedBy,
}

/// Accumulates field errors across a whole validation pass, sorted by field
/// name before being handed back to the caller (spec.md §4.1: "errors
/// returned to caller are sorted by field name").
#[derive(Debug, Default, Clone)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, err: FieldError) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// Consume the accumulator, sort by field name, and turn it into an
    /// `ApiError::InvalidParameters` if anything was recorded.
    pub fn into_result(mut self) -> Result<(), ApiError> {
        if self.0.is_empty() {
            return Ok(());
        }
        self.0.sort_by(|a, b| a.field.cmp(&b.field));
        Err(ApiError::InvalidParameters {
            message: "Invalid parameters".to_string(),
            errors: self.0,
        })
    }

    pub fn into_inner(mut self) -> Vec<FieldError> {
        self.0.sort_by(|a, b| a.field.cmp(&b.field));
        self.0
    }
}

/// The error kinds a model operation can produce. One-to-one with spec.md §7.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    InvalidParameters {
        message: String,
        errors: Vec<FieldError>,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("not authorized")]
    NotAuthorized,

    #[error("in use: {message}")]
    InUse {
        message: String,
        referenced_by: Vec<String>,
    },

    #[error("etag conflict")]
    EtagConflict,

    #[error("no free IP addresses in the provision range")]
    SubnetFull,

    #[error("no unallocated subnet space available")]
    SubnetsExhausted,

    #[error("network overlaps existing network(s): {0:?}")]
    NetworkOverlap(Vec<String>),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid_param(field: impl Into<String>, message: impl Into<String>) -> Self {
        let field = field.into();
        let message = message.into();
        ApiError::InvalidParameters {
            message: format!("{field}: {message}"),
            errors: vec![FieldError::new(field, FieldErrorCode::InvalidParameter, message)],
        }
    }

    pub fn missing_param(field: impl Into<String>) -> Self {
        let field = field.into();
        ApiError::InvalidParameters {
            message: format!("{field} is required"),
            errors: vec![FieldError::new(
                field.clone(),
                FieldErrorCode::MissingParameter,
                format!("{field} is a required parameter"),
            )],
        }
    }

    pub fn used_by(field: impl Into<String>, holder: impl fmt::Display) -> Self {
        let field = field.into();
        ApiError::InvalidParameters {
            message: format!("{field} is used by {holder}"),
            errors: vec![FieldError::new(
                field,
                FieldErrorCode::UsedBy,
                format!("already in use by {holder}"),
            )],
        }
    }

    pub fn in_use(message: impl Into<String>, referenced_by: Vec<String>) -> Self {
        ApiError::InUse {
            message: message.into(),
            referenced_by,
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
