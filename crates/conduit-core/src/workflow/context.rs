//! Workflow context: the immutable per-step view a `WorkflowStep`
//! executes against.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::context::PropagationMeta;
use crate::error::{ConduitError, ConduitResult};
use crate::logging::Logger;

/// Per-step view over a running flow: the flow id, the original input, the
/// results of every step that has completed so far, a logger pre-bound
/// with `{flowId, workflow, step}`, propagation metadata, and optionally
/// the id of the provider driving the flow.
pub struct WorkflowContext {
    /// The executing flow's id.
    pub flow_id: String,
    /// The data passed to `execute`.
    pub data: Value,
    /// Results of every step that has completed so far, keyed by step name.
    pub results: HashMap<String, Value>,
    /// Logger scoped to this flow/step.
    pub log: Arc<dyn Logger>,
    /// Propagation metadata captured at `execute` time.
    pub meta: PropagationMeta,
    /// Identifies the provider instance driving this flow, if the host
    /// application runs more than one.
    pub provider_id: Option<String>,
}

impl WorkflowContext {
    /// Build a context, validating `flow_id` is non-empty.
    pub fn new(
        flow_id: impl Into<String>,
        data: Value,
        results: HashMap<String, Value>,
        meta: PropagationMeta,
        log: Arc<dyn Logger>,
        provider_id: Option<String>,
    ) -> ConduitResult<Self> {
        let flow_id = flow_id.into();
        if flow_id.trim().is_empty() {
            return Err(ConduitError::InvalidArgument("flowId must be non-empty".to_string()));
        }
        Ok(Self {
            flow_id,
            data,
            results,
            log,
            meta,
            provider_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_flow_id() {
        let log = crate::logging::from_meta("workflow", PropagationMeta::default());
        let result = WorkflowContext::new("", Value::Null, HashMap::new(), PropagationMeta::default(), log, None);
        assert!(result.is_err());
    }

    #[test]
    fn accepts_well_formed_inputs() {
        let log = crate::logging::from_meta("workflow", PropagationMeta::default());
        let ctx = WorkflowContext::new(
            "flow-1",
            Value::from(1),
            HashMap::new(),
            PropagationMeta::default(),
            log,
            None,
        )
        .unwrap();
        assert_eq!(ctx.flow_id, "flow-1");
    }
}
