//! Identifiers and ambient propagation context.
//!
//! Ambient propagation uses `tokio::task_local!` because it survives
//! `await` suspension points, unlike a plain thread-local. The field
//! shape (`trace_id`, `parent_span_id`) mirrors a typical span context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque correlation id. A thin alias, not a newtype, since every
/// identifier here is an opaque string threaded verbatim.
pub type CorrelationId = String;

/// Mint a fresh opaque id (event id, correlation id, flow id, ...).
pub fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

/// Propagation metadata threaded through events and workflows.
///
/// Unknown keys arriving over the wire are preserved verbatim in `custom`
/// rather than dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationMeta {
    /// Request-level correlation id supplied by the original caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Distributed trace id, preserved across chained emissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// This task's span id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    /// The parent task's span id, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    /// Authenticated user id, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Account/tenant uuid, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_uuid: Option<String>,
    /// Arbitrary custom fields, preserved verbatim.
    #[serde(flatten)]
    pub custom: BTreeMap<String, Value>,
}

impl PropagationMeta {
    /// Merge `other` into `self`, with `other`'s fields taking precedence
    /// wherever both set the same field. Used to merge caller-supplied meta
    /// with a provider's `defaultMeta`.
    pub fn merged_with(&self, other: &PropagationMeta) -> PropagationMeta {
        PropagationMeta {
            correlation_id: other.correlation_id.clone().or_else(|| self.correlation_id.clone()),
            trace_id: other.trace_id.clone().or_else(|| self.trace_id.clone()),
            span_id: other.span_id.clone().or_else(|| self.span_id.clone()),
            parent_span_id: other
                .parent_span_id
                .clone()
                .or_else(|| self.parent_span_id.clone()),
            user_id: other.user_id.clone().or_else(|| self.user_id.clone()),
            account_uuid: other.account_uuid.clone().or_else(|| self.account_uuid.clone()),
            custom: {
                let mut merged = self.custom.clone();
                merged.extend(other.custom.clone());
                merged
            },
        }
    }

    /// Derive the meta for a message emitted from within a handler that is
    /// currently scoped to `self`: trace id is preserved, a fresh span id is
    /// minted, and `parent_span_id` becomes this task's current span id.
    pub fn child(&self) -> PropagationMeta {
        PropagationMeta {
            correlation_id: self.correlation_id.clone(),
            trace_id: self.trace_id.clone(),
            span_id: Some(fresh_id()),
            parent_span_id: self.span_id.clone(),
            user_id: self.user_id.clone(),
            account_uuid: self.account_uuid.clone(),
            custom: self.custom.clone(),
        }
    }
}

tokio::task_local! {
    static AMBIENT_META: PropagationMeta;
}

/// Ambient propagation context: captures/reads the `PropagationMeta`
/// associated with the currently executing task.
pub struct AmbientContext;

impl AmbientContext {
    /// Run `fut` with `meta` installed as the ambient context for the
    /// duration of the future, including across every `await` suspension
    /// point inside it.
    pub async fn scope<F, T>(meta: PropagationMeta, fut: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        AMBIENT_META.scope(meta, fut).await
    }

    /// Read the current ambient meta, or `PropagationMeta::default()` if no
    /// scope is active (e.g. a top-level `emit` call with no caller trace).
    pub fn current() -> PropagationMeta {
        AMBIENT_META
            .try_with(|meta| meta.clone())
            .unwrap_or_default()
    }
}

/// Resolve the correlation id for an inbound HTTP/socket request: the
/// caller-supplied `x-request-id` header when present, else a fresh uuid.
pub fn correlation_id_from_header(x_request_id: Option<&str>) -> CorrelationId {
    match x_request_id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => fresh_id(),
    }
}
