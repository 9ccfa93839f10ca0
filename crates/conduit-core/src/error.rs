//! Crate-wide error taxonomy.

use std::time::Duration;

/// A single schema validation failure (path + human-readable message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// JSON-pointer-ish path into the validated value.
    pub path: String,
    /// Human-readable message.
    pub message: String,
}

impl ValidationIssue {
    /// Build an issue.
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Errors raised across the event bus, workflow engine, and fan-out
/// provider.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ConduitError {
    /// Emitting or subscribing to a name absent from the event registry.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// Schema validation rejected an inbound event payload, workflow input,
    /// or socket message `data`.
    #[error("validation failed: {}", join_issues(.0))]
    ValidationFailed(Vec<ValidationIssue>),

    /// An event handler raised an error.
    #[error("handler failed: {message}")]
    HandlerFailure {
        /// The underlying error message.
        message: String,
    },

    /// A workflow step raised an error.
    #[error("workflow step '{step_name}' failed: {cause}")]
    WorkflowStepError {
        /// Name of the step definition that failed.
        step_name: String,
        /// Underlying error message.
        cause: String,
    },

    /// A workflow exceeded its effective timeout.
    #[error("workflow {flow_id} timed out after {timeout_ms:?}")]
    WorkflowTimeoutError {
        /// The flow that timed out.
        flow_id: String,
        /// The effective timeout that was exceeded.
        timeout_ms: Duration,
    },

    /// A subscription or emit-with-timeout awaiter timed out before
    /// settlement. Distinct from `WorkflowTimeoutError`, which always
    /// carries a `flowId`.
    #[error("{context} timed out after {timeout_ms:?}")]
    Timeout {
        /// What was being awaited (`"subscription"`, `"emit"`, ...).
        context: String,
        /// The deadline that elapsed.
        timeout_ms: Duration,
    },

    /// A socket guard vetoed activation.
    #[error("guard denied")]
    GuardDenied,

    /// An operation was attempted before the owning provider's `start()`.
    #[error("provider not ready")]
    ProviderNotReady,

    /// A malformed argument was supplied synchronously (topic, socket id,
    /// step name, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A transient broker failure, exhausted retries, or a broker not bound
    /// to a local server.
    #[error("broker error: {0}")]
    BrokerError(String),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience alias used throughout the crate.
pub type ConduitResult<T> = Result<T, ConduitError>;
