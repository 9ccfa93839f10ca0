//! The `Logger` contract every subsystem logs through.
//!
//! The production implementation is built on `tracing` and only compiled in
//! under the `otel` feature, with a dependency-free fallback available
//! when that feature is off.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::context::PropagationMeta;

/// Structured logging contract. Every subsystem in this crate logs through
/// `Logger` rather than calling `tracing`/`println!` directly, so a host
/// application can supply its own sink.
pub trait Logger: Send + Sync {
    /// Log at debug level.
    fn debug(&self, message: &str);
    /// Log at info level.
    fn info(&self, message: &str);
    /// Log at warn level.
    fn warn(&self, message: &str);
    /// Log at error level.
    fn error(&self, message: &str);

    /// Return a child logger with `fields` merged into every subsequent
    /// log line's structured context.
    fn with(&self, fields: BTreeMap<String, Value>) -> Arc<dyn Logger>;

    /// The propagation meta this logger was constructed from, so callers
    /// can thread it onward without re-deriving it.
    fn propagation_meta(&self) -> PropagationMeta;
}

/// Build the crate's default logger for a named subsystem (`"event"`,
/// `"workflow"`, `"fanout"`, ...) scoped to `meta`.
pub fn from_meta(name: &str, meta: PropagationMeta) -> Arc<dyn Logger> {
    #[cfg(feature = "otel")]
    {
        Arc::new(TracingLogger::new(name, meta))
    }
    #[cfg(not(feature = "otel"))]
    {
        Arc::new(NoopLogger::new(name, meta))
    }
}

#[cfg(feature = "otel")]
mod tracing_impl {
    use super::*;

    /// `Logger` implementation backed by the `tracing` crate.
    ///
    /// Every call emits a `tracing` event tagged with the subsystem name,
    /// the propagation ids, and any fields accumulated via [`Logger::with`].
    pub struct TracingLogger {
        name: String,
        meta: PropagationMeta,
        fields: BTreeMap<String, Value>,
    }

    impl TracingLogger {
        /// Construct a logger for `name` scoped to `meta`.
        pub fn new(name: impl Into<String>, meta: PropagationMeta) -> Self {
            Self {
                name: name.into(),
                meta,
                fields: BTreeMap::new(),
            }
        }

        fn fields_json(&self) -> String {
            if self.fields.is_empty() {
                String::new()
            } else {
                serde_json::to_string(&self.fields).unwrap_or_default()
            }
        }
    }

    impl Logger for TracingLogger {
        fn debug(&self, message: &str) {
            tracing::debug!(
                target: "conduit",
                subsystem = %self.name,
                correlation_id = self.meta.correlation_id.as_deref().unwrap_or(""),
                trace_id = self.meta.trace_id.as_deref().unwrap_or(""),
                span_id = self.meta.span_id.as_deref().unwrap_or(""),
                fields = %self.fields_json(),
                "{}",
                message
            );
        }

        fn info(&self, message: &str) {
            tracing::info!(
                target: "conduit",
                subsystem = %self.name,
                correlation_id = self.meta.correlation_id.as_deref().unwrap_or(""),
                trace_id = self.meta.trace_id.as_deref().unwrap_or(""),
                span_id = self.meta.span_id.as_deref().unwrap_or(""),
                fields = %self.fields_json(),
                "{}",
                message
            );
        }

        fn warn(&self, message: &str) {
            tracing::warn!(
                target: "conduit",
                subsystem = %self.name,
                correlation_id = self.meta.correlation_id.as_deref().unwrap_or(""),
                trace_id = self.meta.trace_id.as_deref().unwrap_or(""),
                span_id = self.meta.span_id.as_deref().unwrap_or(""),
                fields = %self.fields_json(),
                "{}",
                message
            );
        }

        fn error(&self, message: &str) {
            tracing::error!(
                target: "conduit",
                subsystem = %self.name,
                correlation_id = self.meta.correlation_id.as_deref().unwrap_or(""),
                trace_id = self.meta.trace_id.as_deref().unwrap_or(""),
                span_id = self.meta.span_id.as_deref().unwrap_or(""),
                fields = %self.fields_json(),
                "{}",
                message
            );
        }

        fn with(&self, fields: BTreeMap<String, Value>) -> Arc<dyn Logger> {
            let mut merged = self.fields.clone();
            merged.extend(fields);
            Arc::new(TracingLogger {
                name: self.name.clone(),
                meta: self.meta.clone(),
                fields: merged,
            })
        }

        fn propagation_meta(&self) -> PropagationMeta {
            self.meta.clone()
        }
    }
}

#[cfg(feature = "otel")]
pub use tracing_impl::TracingLogger;

/// Dependency-free `Logger` used when the `otel` feature is disabled.
/// Writes newline-delimited JSON to stderr.
pub struct NoopLogger {
    name: String,
    meta: PropagationMeta,
    fields: BTreeMap<String, Value>,
}

impl NoopLogger {
    /// Construct a logger for `name` scoped to `meta`.
    pub fn new(name: impl Into<String>, meta: PropagationMeta) -> Self {
        Self {
            name: name.into(),
            meta,
            fields: BTreeMap::new(),
        }
    }

    fn emit(&self, level: &str, message: &str) {
        eprintln!(
            "{{\"level\":\"{}\",\"subsystem\":\"{}\",\"correlationId\":{:?},\"message\":{:?}}}",
            level,
            self.name,
            self.meta.correlation_id.as_deref().unwrap_or(""),
            message
        );
    }
}

impl Logger for NoopLogger {
    fn debug(&self, message: &str) {
        self.emit("debug", message);
    }

    fn info(&self, message: &str) {
        self.emit("info", message);
    }

    fn warn(&self, message: &str) {
        self.emit("warn", message);
    }

    fn error(&self, message: &str) {
        self.emit("error", message);
    }

    fn with(&self, fields: BTreeMap<String, Value>) -> Arc<dyn Logger> {
        let mut merged = self.fields.clone();
        merged.extend(fields);
        Arc::new(NoopLogger {
            name: self.name.clone(),
            meta: self.meta.clone(),
            fields: merged,
        })
    }

    fn propagation_meta(&self) -> PropagationMeta {
        self.meta.clone()
    }
}
