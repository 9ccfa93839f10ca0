//! Workflow definitions and consumer registration.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::PropagationMeta;
use crate::error::ConduitResult;
use crate::workflow::context::WorkflowContext;

/// Whether a step group runs its steps one after another or concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepGroupKind {
    /// Step `i+1` begins only after step `i` completes.
    Sequential,
    /// All steps start before the group is considered begun; results merge
    /// into the accumulator before the next group starts.
    Parallel,
}

/// One ordered group of step names within a [`WorkflowDefinition`].
#[derive(Debug, Clone)]
pub struct StepGroup {
    /// Sequential or parallel.
    pub kind: StepGroupKind,
    /// Step names, in definition order. Each must have a registered
    /// [`WorkflowStep`] by the time the workflow executes.
    pub steps: Vec<String>,
}

impl StepGroup {
    /// A sequential group over `steps`.
    pub fn sequential(steps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            kind: StepGroupKind::Sequential,
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }

    /// A parallel group over `steps`.
    pub fn parallel(steps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            kind: StepGroupKind::Parallel,
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }
}

/// A named workflow: its step groups, in execution order. Input/result
/// schemas are opaque to the engine and validated by the external schema
/// collaborator before `execute`.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    /// Unique workflow name.
    pub name: String,
    /// Ordered step groups.
    pub step_groups: Vec<StepGroup>,
}

impl WorkflowDefinition {
    /// Build a definition.
    pub fn new(name: impl Into<String>, step_groups: Vec<StepGroup>) -> Self {
        Self {
            name: name.into(),
            step_groups,
        }
    }
}

/// One workflow step: an explicit interface, not a duck-typed object,
/// pairing `execute`/`compensate` the way a saga step does.
#[async_trait]
pub trait WorkflowStep: Send + Sync {
    /// Run the step, returning the value recorded into `stepResults`.
    async fn execute(&self, ctx: &WorkflowContext) -> ConduitResult<Value>;

    /// Compensate a previously successful execution. Only invoked for steps
    /// where [`WorkflowStep::has_rollback`] is `true`. Default is a no-op,
    /// for steps declared without compensation.
    async fn rollback(&self, _ctx: &WorkflowContext) -> ConduitResult<()> {
        Ok(())
    }

    /// Whether this step defines real compensation. Steps that leave this
    /// `false` are never pushed onto the rollback stack, distinguishing
    /// "no rollback defined" from "rollback defined but happens to no-op".
    fn has_rollback(&self) -> bool {
        false
    }
}

type CompletionFuture = Pin<Box<dyn Future<Output = ConduitResult<Value>> + Send>>;
type ErrorHookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// `onComplete(data, meta, stepResults) -> result`.
pub type OnComplete = Arc<dyn Fn(Value, PropagationMeta, HashMap<String, Value>) -> CompletionFuture + Send + Sync>;

/// `onError?(data, meta, error, stepResults)` — a side-effecting
/// hook; it does not change the flow's outcome.
pub type OnError =
    Arc<dyn Fn(Value, PropagationMeta, crate::error::ConduitError, HashMap<String, Value>) -> ErrorHookFuture + Send + Sync>;

/// Everything registered for a workflow name beyond its step-group shape:
/// the step executors, the completion hook, and an optional error hook.
#[derive(Clone)]
pub struct WorkflowConsumer {
    /// Step name → executor.
    pub step_handlers: HashMap<String, Arc<dyn WorkflowStep>>,
    /// Runs after the last step group succeeds.
    pub on_complete: OnComplete,
    /// Runs (fire-and-forget) when the flow fails at any step.
    pub on_error: Option<OnError>,
}

/// Tuning knobs for a registered workflow.
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    /// `None` disables the timeout.
    pub default_timeout: Option<std::time::Duration>,
    /// Bound on concurrent steps within a parallel group (default 10).
    pub parallel_concurrency: usize,
    /// How long a completed/failed flow's state is retained for late
    /// status queries (default 5 min).
    pub cleanup_delay: std::time::Duration,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            default_timeout: None,
            parallel_concurrency: 10,
            cleanup_delay: std::time::Duration::from_secs(300),
        }
    }
}
