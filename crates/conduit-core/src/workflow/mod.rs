//! Workflow engine: context, step-group definitions, and the provider
//! that executes them.

mod context;
mod definition;
mod provider;

pub use context::WorkflowContext;
pub use definition::{OnComplete, OnError, StepGroup, StepGroupKind, WorkflowConsumer, WorkflowDefinition, WorkflowOptions, WorkflowStep};
pub use provider::{FlowHandle, FlowStatus, WorkflowProvider};
