//! The schema `Validator` contract, plus synchronous param/UUID validation
//! helpers.
//!
//! Schema validation itself — the actual rule engine behind event payloads,
//! workflow inputs, and socket message `data` — is an external collaborator
//! exactly like HTTP routing or a DI container: a host application supplies
//! its own `Validator` (backed by `jsonschema`, `validator`, hand-written
//! rules, whatever it already uses). This module only defines the seam and
//! a permissive default so the crate is usable standalone.

use serde_json::Value;
use uuid::Uuid;

use crate::error::{ConduitError, ConduitResult, ValidationIssue};

/// An opaque handle to a schema. What it wraps is up to the `Validator`
/// implementation; this crate only ever passes it through by reference.
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    /// Name used in error messages and logs (event name, step name, route
    /// name, ...).
    pub name: String,
    /// The schema document itself, opaque to this crate.
    pub schema: Value,
}

impl SchemaDescriptor {
    /// Build a descriptor for `name` backed by `schema`.
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// Validates a JSON value against a [`SchemaDescriptor`], returning the
/// (possibly coerced/defaulted) value on success or the list of issues on
/// failure.
pub trait Validator: Send + Sync {
    /// Validate `value` against `schema`.
    fn validate(&self, schema: &SchemaDescriptor, value: &Value) -> Result<Value, Vec<ValidationIssue>>;
}

/// A `Validator` that accepts every value unchanged. This is the crate's
/// default so event emission and workflow execution work out of the box
/// before a host application wires in a real schema engine.
pub struct PermissiveValidator;

impl Validator for PermissiveValidator {
    fn validate(&self, _schema: &SchemaDescriptor, value: &Value) -> Result<Value, Vec<ValidationIssue>> {
        Ok(value.clone())
    }
}

/// Validate a required string-ish route/event parameter: missing or blank
/// is rejected synchronously, before any handler runs.
pub fn validated_param(name: &str, value: Option<&str>) -> ConduitResult<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConduitError::InvalidArgument(format!(
            "missing required parameter '{name}'"
        ))),
    }
}

/// Validate that `value` is a well-formed UUID v4, the format socket ids
/// and similar caller-supplied identifiers are expected to use.
pub fn validated_uuid(name: &str, value: &str) -> ConduitResult<Uuid> {
    let parsed = Uuid::parse_str(value)
        .map_err(|_| ConduitError::InvalidArgument(format!("'{name}' must be a valid UUID, got {value:?}")))?;
    if parsed.get_version_num() != 4 {
        return Err(ConduitError::InvalidArgument(format!(
            "'{name}' must be a UUID v4, got version {}",
            parsed.get_version_num()
        )));
    }
    Ok(parsed)
}
