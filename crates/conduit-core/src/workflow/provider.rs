//! Workflow provider: the execution algorithm — ordered step groups,
//! bounded-concurrency parallel groups, reverse-order compensating
//! rollback, and bounded-time execution.
//!
//! The overall shape (per-step `tokio::time::timeout`, reverse `.rev()`
//! compensation) generalizes a flat sequential saga executor to ordered
//! step *groups* plus a bounded worker pool for parallel groups.
//!
//! Every step execution is individually `tokio::spawn`-ed rather than
//! polled inline. That is what makes "the workflow timeout fires but
//! currently executing steps are NOT cancelled" true for free: dropping a
//! `JoinHandle` mid-await detaches it, it does not abort the underlying
//! task, so wrapping the whole run in `tokio::time::timeout` only stops
//! *this* function from waiting, never the steps themselves.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::context::{fresh_id, AmbientContext, PropagationMeta};
use crate::error::{ConduitError, ConduitResult};
use crate::logging::Logger;
use crate::subscription::Subscription;
use crate::workflow::context::WorkflowContext;
use crate::workflow::definition::{StepGroup, StepGroupKind, WorkflowConsumer, WorkflowDefinition, WorkflowOptions, WorkflowStep};

/// A running or completed flow's coarse state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    /// Allocated but not yet running.
    Pending,
    /// Step groups are executing.
    Running,
    /// `onComplete` returned successfully.
    Completed,
    /// A step failed, the timeout elapsed, or `onComplete` errored.
    Failed,
}

/// The observer of a running workflow.
pub struct FlowHandle {
    /// This flow's id.
    pub flow_id: String,
    status: Arc<Mutex<FlowStatus>>,
    subscription: Subscription<Value>,
}

impl FlowHandle {
    /// Current coarse status.
    pub fn status(&self) -> FlowStatus {
        *self.status.lock().unwrap()
    }

    /// Await the flow's terminal outcome.
    pub async fn result(&self) -> ConduitResult<Value> {
        self.subscription.wait().await
    }
}

struct FlowRecord {
    status: Arc<Mutex<FlowStatus>>,
    subscription: Subscription<Value>,
}

struct GroupFailure {
    step_name: String,
    cause: String,
}

struct RunFailure {
    step_name: String,
    cause: String,
    results: HashMap<String, Value>,
    rollback_stack: Vec<(String, Arc<dyn WorkflowStep>)>,
}

async fn run_step(step_name: String, step: Arc<dyn WorkflowStep>, ctx: WorkflowContext) -> (String, Result<Value, String>) {
    let outcome = step.execute(&ctx).await.map_err(|e| e.to_string());
    (step_name, outcome)
}

fn build_step_context(
    flow_id: &str,
    data: &Value,
    results: &HashMap<String, Value>,
    meta: &PropagationMeta,
    logger: &Arc<dyn Logger>,
) -> ConduitResult<WorkflowContext> {
    WorkflowContext::new(flow_id.to_string(), data.clone(), results.clone(), meta.clone(), logger.clone(), None)
}

async fn run_sequential_group(
    group: &StepGroup,
    consumer: &WorkflowConsumer,
    flow_id: &str,
    data: &Value,
    meta: &PropagationMeta,
    logger: &Arc<dyn Logger>,
    results: &mut HashMap<String, Value>,
    rollback_stack: &mut Vec<(String, Arc<dyn WorkflowStep>)>,
) -> Result<(), GroupFailure> {
    for step_name in &group.steps {
        let Some(step) = consumer.step_handlers.get(step_name).cloned() else {
            return Err(GroupFailure {
                step_name: step_name.clone(),
                cause: "no handler registered for step".to_string(),
            });
        };
        let ctx = build_step_context(flow_id, data, results, meta, logger).map_err(|e| GroupFailure {
            step_name: step_name.clone(),
            cause: e.to_string(),
        })?;
        let handle = tokio::spawn(run_step(step_name.clone(), step.clone(), ctx));
        let (name, outcome) = handle.await.map_err(|e| GroupFailure {
            step_name: step_name.clone(),
            cause: format!("step task panicked: {e}"),
        })?;
        match outcome {
            Ok(value) => {
                results.insert(name.clone(), value);
                if step.has_rollback() {
                    rollback_stack.push((name, step));
                }
            }
            Err(cause) => return Err(GroupFailure { step_name: name, cause }),
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_parallel_group(
    group: &StepGroup,
    consumer: &WorkflowConsumer,
    flow_id: &str,
    data: &Value,
    meta: &PropagationMeta,
    logger: &Arc<dyn Logger>,
    results: &mut HashMap<String, Value>,
    rollback_stack: &mut Vec<(String, Arc<dyn WorkflowStep>)>,
    concurrency: usize,
) -> Result<(), GroupFailure> {
    let mut steps = Vec::with_capacity(group.steps.len());
    for step_name in &group.steps {
        match consumer.step_handlers.get(step_name).cloned() {
            Some(step) => steps.push((step_name.clone(), step)),
            None => {
                return Err(GroupFailure {
                    step_name: step_name.clone(),
                    cause: "no handler registered for step".to_string(),
                })
            }
        }
    }

    let limit = concurrency.max(1);
    let mut outcomes: Vec<Option<Result<Value, String>>> = vec![None; steps.len()];
    let mut in_flight = FuturesUnordered::new();
    let mut next_idx = 0usize;

    let mut launch_next = |idx: usize, in_flight: &mut FuturesUnordered<JoinHandle<(usize, String, Result<Value, String>)>>| -> Result<(), GroupFailure> {
        let (name, step) = steps[idx].clone();
        let ctx = build_step_context(flow_id, data, results, meta, logger).map_err(|e| GroupFailure {
            step_name: name.clone(),
            cause: e.to_string(),
        })?;
        in_flight.push(tokio::spawn(async move {
            let (name, outcome) = run_step(name, step, ctx).await;
            (idx, name, outcome)
        }));
        Ok(())
    };

    while next_idx < steps.len() && in_flight.len() < limit {
        launch_next(next_idx, &mut in_flight)?;
        next_idx += 1;
    }

    while let Some(joined) = in_flight.next().await {
        match joined {
            Ok((idx, name, outcome)) => {
                // Pushed here, in the order `FuturesUnordered` actually yields
                // completions, not definition order: a later-defined step can
                // finish before an earlier one, and rollback must unwind in
                // true completion order.
                if let Ok(value) = &outcome {
                    results.insert(name.clone(), value.clone());
                    let step = &steps[idx].1;
                    if step.has_rollback() {
                        rollback_stack.push((name.clone(), step.clone()));
                    }
                }
                outcomes[idx] = Some(outcome);
            }
            Err(join_err) => {
                // We don't know which slot panicked directly from a JoinError,
                // but FuturesUnordered only ever yields our own wrapper future,
                // whose only fallible part is the join itself; treat it as the
                // next unfilled slot in launch order.
                if let Some(slot) = outcomes.iter().position(Option::is_none) {
                    outcomes[slot] = Some(Err(format!("step task panicked: {join_err}")));
                }
            }
        }
        if next_idx < steps.len() {
            launch_next(next_idx, &mut in_flight)?;
            next_idx += 1;
        }
    }

    let first_failure = outcomes.iter().enumerate().find_map(|(idx, outcome)| match outcome {
        Some(Err(cause)) => Some((idx, cause.clone())),
        _ => None,
    });

    if let Some((idx, cause)) = first_failure {
        for (other_idx, outcome) in outcomes.iter().enumerate() {
            if other_idx != idx {
                if let Some(Err(discarded)) = outcome {
                    logger.warn(&format!(
                        "parallel step '{}' also failed (discarded, first failure wins): {discarded}",
                        steps[other_idx].0
                    ));
                }
            }
        }
        return Err(GroupFailure {
            step_name: steps[idx].0.clone(),
            cause,
        });
    }

    Ok(())
}

async fn run_definition(
    definition: &WorkflowDefinition,
    consumer: &WorkflowConsumer,
    flow_id: &str,
    data: &Value,
    meta: &PropagationMeta,
    logger: &Arc<dyn Logger>,
    concurrency: usize,
) -> Result<HashMap<String, Value>, RunFailure> {
    let mut results = HashMap::new();
    let mut rollback_stack: Vec<(String, Arc<dyn WorkflowStep>)> = Vec::new();

    for group in &definition.step_groups {
        let outcome = match group.kind {
            StepGroupKind::Sequential => {
                run_sequential_group(group, consumer, flow_id, data, meta, logger, &mut results, &mut rollback_stack).await
            }
            StepGroupKind::Parallel => {
                run_parallel_group(
                    group,
                    consumer,
                    flow_id,
                    data,
                    meta,
                    logger,
                    &mut results,
                    &mut rollback_stack,
                    concurrency,
                )
                .await
            }
        };
        if let Err(GroupFailure { step_name, cause }) = outcome {
            return Err(RunFailure {
                step_name,
                cause,
                results,
                rollback_stack,
            });
        }
    }

    Ok(results)
}

/// Executes registered workflows.
pub struct WorkflowProvider {
    consumers: RwLock<HashMap<String, (WorkflowConsumer, WorkflowOptions)>>,
    flows: Arc<Mutex<HashMap<String, FlowRecord>>>,
    cleanup_handles: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    logger: Arc<dyn Logger>,
    started: AtomicBool,
}

impl Default for WorkflowProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowProvider {
    /// Build an empty provider.
    pub fn new() -> Self {
        Self {
            consumers: RwLock::new(HashMap::new()),
            flows: Arc::new(Mutex::new(HashMap::new())),
            cleanup_handles: Arc::new(Mutex::new(HashMap::new())),
            logger: crate::logging::from_meta("workflow", PropagationMeta::default()),
            started: AtomicBool::new(false),
        }
    }

    /// Register (or replace) the consumer and options for `name`.
    pub fn register_definition_consumer(&self, name: impl Into<String>, consumer: WorkflowConsumer, options: WorkflowOptions) {
        self.consumers.write().unwrap().insert(name.into(), (consumer, options));
    }

    /// Look up a flow's current status, if it hasn't been cleaned up yet.
    pub fn get_status(&self, flow_id: &str) -> Option<FlowStatus> {
        self.flows.lock().unwrap().get(flow_id).map(|record| *record.status.lock().unwrap())
    }

    /// Begin executing `definition` against `data`, returning a handle
    /// immediately without awaiting completion.
    pub fn execute(&self, definition: WorkflowDefinition, data: Value, timeout_override: Option<Duration>) -> ConduitResult<FlowHandle> {
        let (consumer, options) = {
            let consumers = self.consumers.read().unwrap();
            consumers
                .get(&definition.name)
                .cloned()
                .ok_or_else(|| ConduitError::InvalidArgument(format!("no consumer registered for workflow '{}'", definition.name)))?
        };

        let flow_id = fresh_id();
        let status = Arc::new(Mutex::new(FlowStatus::Pending));
        let subscription = Subscription::new();
        self.flows.lock().unwrap().insert(
            flow_id.clone(),
            FlowRecord {
                status: status.clone(),
                subscription: subscription.clone(),
            },
        );

        let ambient_meta = AmbientContext::current();
        let mut fields = BTreeMap::new();
        fields.insert("flowId".to_string(), Value::String(flow_id.clone()));
        fields.insert("workflow".to_string(), Value::String(definition.name.clone()));
        let logger = self.logger.with(fields);

        let effective_timeout = timeout_override.or(options.default_timeout);
        let flows = self.flows.clone();
        let cleanup_handles = self.cleanup_handles.clone();
        let cleanup_delay = options.cleanup_delay;
        let concurrency = options.parallel_concurrency;

        let flow_id_task = flow_id.clone();
        let status_task = status.clone();
        let subscription_task = subscription.clone();

        tokio::spawn(async move {
            *status_task.lock().unwrap() = FlowStatus::Running;

            let run = run_definition(&definition, &consumer, &flow_id_task, &data, &ambient_meta, &logger, concurrency);
            let timed = match effective_timeout {
                None => run.await,
                Some(duration) => match tokio::time::timeout(duration, run).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        *status_task.lock().unwrap() = FlowStatus::Failed;
                        subscription_task.reject(ConduitError::WorkflowTimeoutError {
                            flow_id: flow_id_task.clone(),
                            timeout_ms: duration,
                        });
                        schedule_cleanup(flows, cleanup_handles, flow_id_task.clone(), cleanup_delay);
                        return;
                    }
                },
            };

            match timed {
                Ok(results) => {
                    match (consumer.on_complete)(data.clone(), ambient_meta.clone(), results).await {
                        Ok(value) => {
                            *status_task.lock().unwrap() = FlowStatus::Completed;
                            subscription_task.resolve(value);
                        }
                        Err(e) => {
                            *status_task.lock().unwrap() = FlowStatus::Failed;
                            subscription_task.reject(e);
                        }
                    }
                }
                Err(RunFailure {
                    step_name,
                    cause,
                    results,
                    rollback_stack,
                }) => {
                    for (name, step) in rollback_stack.into_iter().rev() {
                        let rollback_ctx = match build_step_context(&flow_id_task, &data, &results, &ambient_meta, &logger) {
                            Ok(ctx) => ctx,
                            Err(_) => continue,
                        };
                        if let Err(e) = step.rollback(&rollback_ctx).await {
                            logger.error(&format!("rollback failed for step '{name}': {e}"));
                        }
                    }
                    if let Some(on_error) = &consumer.on_error {
                        let error = ConduitError::WorkflowStepError {
                            step_name: step_name.clone(),
                            cause: cause.clone(),
                        };
                        (on_error)(data.clone(), ambient_meta.clone(), error, results.clone()).await;
                    }
                    *status_task.lock().unwrap() = FlowStatus::Failed;
                    subscription_task.reject(ConduitError::WorkflowStepError { step_name, cause });
                }
            }

            schedule_cleanup(flows, cleanup_handles, flow_id_task.clone(), cleanup_delay);
        });

        Ok(FlowHandle { flow_id, status, subscription })
    }

    /// Start the provider. Idempotent.
    pub async fn start(&self) -> ConduitResult<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop the provider: cancels pending cleanup timers and drops
    /// in-memory flow state. Idempotent.
    pub async fn stop(&self) -> ConduitResult<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        for (_, handle) in self.cleanup_handles.lock().unwrap().drain() {
            handle.abort();
        }
        self.flows.lock().unwrap().clear();
        Ok(())
    }
}

fn schedule_cleanup(
    flows: Arc<Mutex<HashMap<String, FlowRecord>>>,
    cleanup_handles: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    flow_id: String,
    delay: Duration,
) {
    let flow_id_for_task = flow_id.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        flows.lock().unwrap().remove(&flow_id_for_task);
    });
    cleanup_handles.lock().unwrap().insert(flow_id, handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::StepGroup;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct RecordingStep {
        name: &'static str,
        fails: bool,
        sleep: Option<Duration>,
        rollback_log: Arc<Mutex<Vec<String>>>,
        has_rollback: bool,
    }

    #[async_trait]
    impl WorkflowStep for RecordingStep {
        async fn execute(&self, _ctx: &WorkflowContext) -> ConduitResult<Value> {
            if let Some(d) = self.sleep {
                tokio::time::sleep(d).await;
            }
            if self.fails {
                return Err(ConduitError::HandlerFailure {
                    message: format!("{} failed", self.name),
                });
            }
            Ok(Value::String(self.name.to_string()))
        }

        async fn rollback(&self, _ctx: &WorkflowContext) -> ConduitResult<()> {
            self.rollback_log.lock().unwrap().push(format!("{}.rollback", self.name));
            Ok(())
        }

        fn has_rollback(&self) -> bool {
            self.has_rollback
        }
    }

    fn on_complete_identity() -> crate::workflow::definition::OnComplete {
        Arc::new(|_data, _meta, results| Box::pin(async move { Ok(serde_json::to_value(results).unwrap()) }))
    }

    #[tokio::test]
    async fn sequential_then_parallel_then_sequential_groups_run_in_order() {
        let provider = WorkflowProvider::new();
        provider.start().await.unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut step_handlers: HashMap<String, Arc<dyn WorkflowStep>> = HashMap::new();
        for name in ["init", "task-a", "task-b", "finalize"] {
            step_handlers.insert(
                name.to_string(),
                Arc::new(RecordingStep {
                    name: Box::leak(name.to_string().into_boxed_str()),
                    fails: false,
                    sleep: None,
                    rollback_log: log.clone(),
                    has_rollback: false,
                }),
            );
        }
        let consumer = WorkflowConsumer {
            step_handlers,
            on_complete: on_complete_identity(),
            on_error: None,
        };
        provider.register_definition_consumer("order-fulfillment", consumer, WorkflowOptions::default());

        let definition = WorkflowDefinition::new(
            "order-fulfillment",
            vec![
                StepGroup::sequential(["init"]),
                StepGroup::parallel(["task-a", "task-b"]),
                StepGroup::sequential(["finalize"]),
            ],
        );
        let handle = provider.execute(definition, Value::Null, None).unwrap();
        let result = handle.result().await.unwrap();
        assert_eq!(handle.status(), FlowStatus::Completed);
        let results: HashMap<String, Value> = serde_json::from_value(result).unwrap();
        assert_eq!(results.len(), 4);
        provider.stop().await.unwrap();
    }

    #[tokio::test]
    async fn later_step_failure_rolls_back_completed_steps_in_reverse_order() {
        let provider = WorkflowProvider::new();
        provider.start().await.unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut step_handlers: HashMap<String, Arc<dyn WorkflowStep>> = HashMap::new();
        step_handlers.insert(
            "charge".to_string(),
            Arc::new(RecordingStep {
                name: "charge",
                fails: false,
                sleep: None,
                rollback_log: log.clone(),
                has_rollback: true,
            }),
        );
        step_handlers.insert(
            "reserve".to_string(),
            Arc::new(RecordingStep {
                name: "reserve",
                fails: false,
                sleep: None,
                rollback_log: log.clone(),
                has_rollback: true,
            }),
        );
        step_handlers.insert(
            "ship".to_string(),
            Arc::new(RecordingStep {
                name: "ship",
                fails: true,
                sleep: None,
                rollback_log: log.clone(),
                has_rollback: true,
            }),
        );
        let consumer = WorkflowConsumer {
            step_handlers,
            on_complete: on_complete_identity(),
            on_error: None,
        };
        provider.register_definition_consumer("checkout", consumer, WorkflowOptions::default());
        let definition = WorkflowDefinition::new("checkout", vec![StepGroup::sequential(["charge", "reserve", "ship"])]);
        let handle = provider.execute(definition, Value::Null, None).unwrap();
        let err = handle.result().await.unwrap_err();
        assert!(matches!(err, ConduitError::WorkflowStepError { step_name, .. } if step_name == "ship"));
        assert_eq!(handle.status(), FlowStatus::Failed);
        assert_eq!(*log.lock().unwrap(), vec!["reserve.rollback".to_string(), "charge.rollback".to_string()]);
        provider.stop().await.unwrap();
    }

    #[tokio::test]
    async fn parallel_rollback_order_follows_completion_order_not_definition_order() {
        let provider = WorkflowProvider::new();
        provider.start().await.unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut step_handlers: HashMap<String, Arc<dyn WorkflowStep>> = HashMap::new();
        step_handlers.insert(
            "slow".to_string(),
            Arc::new(RecordingStep {
                name: "slow",
                fails: false,
                sleep: Some(Duration::from_millis(60)),
                rollback_log: log.clone(),
                has_rollback: true,
            }),
        );
        step_handlers.insert(
            "fast".to_string(),
            Arc::new(RecordingStep {
                name: "fast",
                fails: false,
                sleep: Some(Duration::from_millis(5)),
                rollback_log: log.clone(),
                has_rollback: true,
            }),
        );
        step_handlers.insert(
            "finalize".to_string(),
            Arc::new(RecordingStep {
                name: "finalize",
                fails: true,
                sleep: None,
                rollback_log: log.clone(),
                has_rollback: false,
            }),
        );
        let consumer = WorkflowConsumer {
            step_handlers,
            on_complete: on_complete_identity(),
            on_error: None,
        };
        provider.register_definition_consumer("shipment", consumer, WorkflowOptions::default());
        // "slow" is defined before "fast" but finishes after it; a correct
        // rollback must unwind in the order the steps actually completed,
        // not the order they were listed in the group.
        let definition = WorkflowDefinition::new(
            "shipment",
            vec![
                StepGroup::parallel(["slow", "fast"]),
                StepGroup::sequential(["finalize"]),
            ],
        );
        let handle = provider.execute(definition, Value::Null, None).unwrap();
        let err = handle.result().await.unwrap_err();
        assert!(matches!(err, ConduitError::WorkflowStepError { step_name, .. } if step_name == "finalize"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["slow.rollback".to_string(), "fast.rollback".to_string()]
        );
        provider.stop().await.unwrap();
    }

    #[tokio::test]
    async fn a_step_exceeding_the_default_timeout_fails_the_flow() {
        let provider = WorkflowProvider::new();
        provider.start().await.unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut step_handlers: HashMap<String, Arc<dyn WorkflowStep>> = HashMap::new();
        step_handlers.insert(
            "slow".to_string(),
            Arc::new(RecordingStep {
                name: "slow",
                fails: false,
                sleep: Some(Duration::from_millis(500)),
                rollback_log: log.clone(),
                has_rollback: false,
            }),
        );
        let consumer = WorkflowConsumer {
            step_handlers,
            on_complete: on_complete_identity(),
            on_error: None,
        };
        provider.register_definition_consumer(
            "slow-pipeline",
            consumer,
            WorkflowOptions {
                default_timeout: Some(Duration::from_millis(50)),
                ..WorkflowOptions::default()
            },
        );
        let definition = WorkflowDefinition::new("slow-pipeline", vec![StepGroup::sequential(["slow"])]);
        let handle = provider.execute(definition, Value::Null, None).unwrap();
        let err = handle.result().await.unwrap_err();
        assert!(matches!(err, ConduitError::WorkflowTimeoutError { timeout_ms, .. } if timeout_ms >= Duration::from_millis(50)));
        assert_eq!(handle.status(), FlowStatus::Failed);
        provider.stop().await.unwrap();
    }

    #[tokio::test]
    async fn missing_step_handler_is_reported_and_stops_the_flow() {
        let provider = WorkflowProvider::new();
        provider.start().await.unwrap();
        let consumer = WorkflowConsumer {
            step_handlers: HashMap::new(),
            on_complete: on_complete_identity(),
            on_error: None,
        };
        provider.register_definition_consumer("gap", consumer, WorkflowOptions::default());
        let definition = WorkflowDefinition::new("gap", vec![StepGroup::sequential(["ghost"])]);
        let handle = provider.execute(definition, Value::Null, None).unwrap();
        let err = handle.result().await.unwrap_err();
        assert!(matches!(err, ConduitError::WorkflowStepError { step_name, .. } if step_name == "ghost"));
        provider.stop().await.unwrap();
    }

    #[tokio::test]
    async fn parallel_group_bounds_concurrency() {
        let provider = WorkflowProvider::new();
        provider.start().await.unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        struct BoundedStep {
            in_flight: Arc<AtomicUsize>,
            max_seen: Arc<AtomicUsize>,
        }
        #[async_trait]
        impl WorkflowStep for BoundedStep {
            async fn execute(&self, _ctx: &WorkflowContext) -> ConduitResult<Value> {
                let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }

        let mut step_handlers: HashMap<String, Arc<dyn WorkflowStep>> = HashMap::new();
        let names: Vec<String> = (0..8).map(|i| format!("s{i}")).collect();
        for name in &names {
            step_handlers.insert(
                name.clone(),
                Arc::new(BoundedStep {
                    in_flight: in_flight.clone(),
                    max_seen: max_seen.clone(),
                }),
            );
        }
        let consumer = WorkflowConsumer {
            step_handlers,
            on_complete: on_complete_identity(),
            on_error: None,
        };
        provider.register_definition_consumer(
            "bounded",
            consumer,
            WorkflowOptions {
                parallel_concurrency: 2,
                ..WorkflowOptions::default()
            },
        );
        let definition = WorkflowDefinition::new("bounded", vec![StepGroup::parallel(names)]);
        let handle = provider.execute(definition, Value::Null, None).unwrap();
        handle.result().await.unwrap();
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
        provider.stop().await.unwrap();
    }
}
