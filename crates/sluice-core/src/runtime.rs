//! Flow runtime.
//!
//! Each step runs on its own worker thread and owns one inbound channel.
//! Producers hand messages to their [`Router`], which fans them out to the
//! channels of linked steps, so delivery is FIFO per (producer, consumer)
//! pair. Messages from different producers may interleave freely; the
//! [`EdgeTracker`] checks each edge's sequence on its own.
//!
//! Head steps (no inbound links) receive one synthetic empty message, flagged
//! last, that starts them. A step finishes once every inbound edge has
//! delivered its last message.

use crate::component::{CancellationToken, Component, ComponentContext, ComponentState, ComponentStatistics};
use crate::error::ComponentError;
use crate::flow::{Flow, FlowError};
use crate::message::{Message, MessageHeader};
use crate::model::Model;
use crate::registry::ComponentRegistry;
use crate::target::{MessageTarget, Router, RoutingError};
use crate::tracking::{ExecutionStatus, ExecutionTracker, LogLevel, NoOpTracker};
use crate::transform::TransformRegistry;
use indexmap::IndexMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Per-edge sequence and stream-end bookkeeping for one consumer.
#[derive(Debug, Clone)]
pub struct EdgeTracker {
    edges: IndexMap<String, EdgeState>,
}

#[derive(Debug, Clone, Copy)]
struct EdgeState {
    expected: u64,
    closed: bool,
}

impl EdgeTracker {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            edges: origins
                .into_iter()
                .map(|origin| {
                    (
                        origin.into(),
                        EdgeState {
                            expected: 1,
                            closed: false,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Check a message against its edge and record it.
    ///
    /// Returns whether every edge has now delivered its last message.
    pub fn accept(&mut self, message: &Message) -> Result<bool, ComponentError> {
        let origin = message.origin_id();
        let edge = self
            .edges
            .get_mut(origin)
            .ok_or_else(|| ComponentError::UnknownEdge(origin.to_string()))?;
        if edge.closed {
            return Err(ComponentError::StreamClosed(origin.to_string()));
        }
        if message.sequence_number() != edge.expected {
            return Err(ComponentError::Ordering {
                edge: origin.to_string(),
                expected: edge.expected,
                actual: message.sequence_number(),
            });
        }
        edge.expected += 1;
        edge.closed = message.is_last();
        Ok(self.is_complete())
    }

    pub fn is_complete(&self) -> bool {
        self.edges.values().all(|e| e.closed)
    }
}

/// Result of a finished execution.
#[derive(Debug)]
pub struct FlowOutcome {
    pub execution_id: String,
    pub status: ExecutionStatus,
    /// Messages emitted by terminal steps, keyed by step id.
    pub outputs: IndexMap<String, Vec<Message>>,
    pub statistics: IndexMap<String, ComponentStatistics>,
    pub duration: Duration,
}

impl FlowOutcome {
    pub fn output(&self, step_id: &str) -> &[Message] {
        self.outputs.get(step_id).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Runs flows against a component registry.
#[derive(Clone)]
pub struct FlowRuntime {
    registry: Arc<ComponentRegistry>,
    transforms: Arc<TransformRegistry>,
    tracker: Arc<dyn ExecutionTracker>,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl FlowRuntime {
    pub fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            transforms: Arc::new(TransformRegistry::with_builtins()),
            tracker: Arc::new(NoOpTracker),
            cancel: CancellationToken::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = Arc::new(transforms);
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn ExecutionTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// How often blocked workers wake up to check for cancellation.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Token that cancels executions of this runtime. Once cancelled it
    /// stays cancelled. A failing step only cancels its own execution.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run a flow to completion.
    ///
    /// Every started component is stopped, whatever the outcome. The first
    /// step failure cancels the rest of the execution and is returned as
    /// [`FlowError::StepFailed`].
    pub fn execute(&self, flow: &Flow, execution_id: impl Into<String>) -> Result<FlowOutcome, FlowError> {
        let execution_id = execution_id.into();
        flow.validate(&self.registry)?;

        let started = Instant::now();
        self.tracker.before_flow(&execution_id, flow);
        tracing::info!(execution_id = %execution_id, flow = %flow.id, "executing flow");

        let cancel = self.cancel.child();
        let mut reports = self.run_workers(flow, &execution_id, &cancel);
        let (status, failure) = summarize(&mut reports, &self.cancel);

        let cause = failure.as_ref().map(|(step, err)| format!("{}: {}", step, err));
        self.tracker
            .after_flow(&execution_id, flow, status, cause.as_deref());

        if let Some((step, source)) = failure {
            return Err(FlowError::StepFailed { step, source });
        }
        if status == ExecutionStatus::Cancelled {
            return Err(FlowError::Cancelled);
        }

        let mut outputs = IndexMap::new();
        let mut statistics = IndexMap::new();
        for report in reports {
            if let Some(captured) = report.captured {
                outputs.insert(report.step_id.clone(), captured);
            }
            statistics.insert(report.step_id, report.statistics);
        }
        Ok(FlowOutcome {
            execution_id,
            status,
            outputs,
            statistics,
            duration: started.elapsed(),
        })
    }

    fn run_workers(
        &self,
        flow: &Flow,
        execution_id: &str,
        cancel: &CancellationToken,
    ) -> Vec<StepReport> {
        let models: IndexMap<&str, Arc<Model>> = flow
            .models
            .iter()
            .map(|m| (m.id.as_str(), Arc::new(m.clone())))
            .collect();

        let channels: IndexMap<&str, (Sender<Message>, Receiver<Message>)> = flow
            .steps
            .iter()
            .map(|s| (s.id.as_str(), mpsc::channel()))
            .collect();
        let senders: IndexMap<&str, Sender<Message>> =
            channels.iter().map(|(id, (tx, _))| (*id, tx.clone())).collect();

        let mut workers = Vec::with_capacity(flow.steps.len());
        for ((step_id, (_, receiver)), step) in channels.into_iter().zip(&flow.steps) {
            let upstream = flow.upstream(step_id);
            let downstream = flow.downstream(step_id);

            let mut router = Router::new(step_id).require_target(step.require_target);
            for next in &downstream {
                if let Some(sender) = senders.get(next) {
                    router.connect(*next, sender.clone());
                }
            }
            if downstream.is_empty() && !step.require_target {
                router = router.capture();
            }

            let origins: Vec<String> = if upstream.is_empty() {
                // Sending cannot fail: the receiver is held just below.
                if let Some(sender) = senders.get(step_id) {
                    let _ = sender.send(start_message(&flow.id));
                }
                vec![flow.id.clone()]
            } else {
                upstream.iter().map(|s| s.to_string()).collect()
            };

            let ctx = ComponentContext {
                execution_id: execution_id.to_string(),
                step: Arc::new(step.clone()),
                input_model: step.input_model.as_deref().and_then(|id| models.get(id).cloned()),
                output_model: step.output_model.as_deref().and_then(|id| models.get(id).cloned()),
                tracker: Arc::clone(&self.tracker),
                transforms: Arc::clone(&self.transforms),
                cancel: cancel.clone(),
            };
            workers.push(Worker {
                component: self.registry.create(&step.component_type),
                ctx,
                receiver,
                router,
                edges: EdgeTracker::new(origins),
                poll_interval: self.poll_interval,
            });
        }
        // Only routers hold senders now, so a consumer sees a disconnect
        // once all of its producers are gone.
        drop(senders);

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers.len());
            let mut reports = Vec::new();
            for worker in workers {
                let step_id = worker.ctx.step.id.clone();
                let spawned = thread::Builder::new()
                    .name(format!("sluice-{}", step_id))
                    .spawn_scoped(scope, move || worker.run());
                match spawned {
                    Ok(handle) => handles.push((step_id, handle)),
                    Err(e) => {
                        cancel.cancel();
                        reports.push(StepReport::failed(
                            step_id,
                            ComponentError::Other(format!("failed to spawn worker: {}", e).into()),
                        ));
                    }
                }
            }
            for (step_id, handle) in handles {
                let report = handle.join().unwrap_or_else(|_| {
                    cancel.cancel();
                    StepReport::failed(step_id, ComponentError::Other("worker panicked".into()))
                });
                reports.push(report);
            }
            reports
        })
    }
}

fn start_message(flow_id: &str) -> Message {
    Message::empty().with_header(MessageHeader {
        origin_id: flow_id.to_string(),
        sequence_number: 1,
        last_message: true,
    })
}

/// Pick the execution status and take out the root-cause failure.
///
/// Failures caused by another step's failure (cancellation, disconnected
/// channels) only count when nothing else failed and the runtime itself was
/// not cancelled.
fn summarize(
    reports: &mut [StepReport],
    cancel: &CancellationToken,
) -> (ExecutionStatus, Option<(String, ComponentError)>) {
    let mut primary = None;
    let mut secondary = None;
    for (i, report) in reports.iter().enumerate() {
        match &report.result {
            Err(e) if !is_secondary(e) => {
                primary.get_or_insert(i);
            }
            Err(e) if !e.is_cancelled() => {
                secondary.get_or_insert(i);
            }
            _ => {}
        }
    }
    if reports.iter().all(|r| r.result.is_ok()) {
        return (ExecutionStatus::Done, None);
    }

    let root = match (primary, secondary) {
        (Some(i), _) => i,
        (None, Some(i)) if !cancel.is_cancelled() => i,
        _ => return (ExecutionStatus::Cancelled, None),
    };
    let report = &mut reports[root];
    let failure = std::mem::replace(&mut report.result, Ok(()))
        .err()
        .map(|e| (report.step_id.clone(), e));
    (ExecutionStatus::Error, failure)
}

fn is_secondary(err: &ComponentError) -> bool {
    matches!(
        err,
        ComponentError::Cancelled
            | ComponentError::UpstreamClosed
            | ComponentError::Routing(RoutingError::Disconnected(_))
    )
}

struct StepReport {
    step_id: String,
    result: Result<(), ComponentError>,
    statistics: ComponentStatistics,
    captured: Option<Vec<Message>>,
}

impl StepReport {
    fn failed(step_id: String, err: ComponentError) -> Self {
        Self {
            step_id,
            result: Err(err),
            statistics: ComponentStatistics::default(),
            captured: None,
        }
    }
}

struct Worker {
    component: Option<Box<dyn Component>>,
    ctx: ComponentContext,
    receiver: Receiver<Message>,
    router: Router,
    edges: EdgeTracker,
    poll_interval: Duration,
}

impl Worker {
    fn run(mut self) -> StepReport {
        let step = Arc::clone(&self.ctx.step);
        let tracker = Arc::clone(&self.ctx.tracker);
        tracker.step_started(&self.ctx.execution_id, &step);

        let mut state = ComponentState::Created;
        let result = match self.component.take() {
            Some(mut component) => {
                let result = self.drive(component.as_mut(), &mut state);
                component.stop();
                state = ComponentState::Stopped;
                result
            }
            None => Err(ComponentError::Other(
                format!("component type '{}' is not registered", step.component_type).into(),
            )),
        };
        tracing::trace!(step = %step.id, ?state, "worker done");

        if result.is_err() {
            self.ctx.cancel.cancel();
        }
        // Disconnect downstream consumers either way.
        self.router.close();

        let (status, cause) = match &result {
            Ok(()) => (ExecutionStatus::Done, None),
            Err(e) if e.is_cancelled() => (ExecutionStatus::Cancelled, Some(e.to_string())),
            Err(e) => (ExecutionStatus::Error, Some(e.to_string())),
        };
        if let Some(cause) = &cause {
            self.ctx.log(LogLevel::Error, cause);
        }
        let statistics = self.router.statistics().clone();
        tracker.step_finished(
            &self.ctx.execution_id,
            &step,
            status,
            cause.as_deref(),
            &statistics,
        );

        let captured = self
            .router
            .is_capturing()
            .then(|| self.router.take_captured());
        StepReport {
            step_id: step.id.clone(),
            result,
            statistics,
            captured,
        }
    }

    fn drive(&mut self, component: &mut dyn Component, state: &mut ComponentState) -> Result<(), ComponentError> {
        component.start(&self.ctx)?;
        *state = ComponentState::Started;

        loop {
            self.ctx.cancel.check()?;
            let message = match self.receiver.recv_timeout(self.poll_interval) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.ctx.cancel.check()?;
                    return Err(ComponentError::UpstreamClosed);
                }
            };

            let complete = self.edges.accept(&message)?;
            self.router.statistics_mut().record_inbound(&message);
            let boundary = message.is_last();
            // Components only see the flag once all edges are done.
            let message = if boundary && !complete {
                message.last(false)
            } else {
                message
            };

            *state = ComponentState::Handling;
            self.ctx
                .tracker
                .before_handle(&self.ctx.execution_id, &self.ctx.step, &message);
            if let Err(err) = component.handle(&message, &mut self.router, boundary) {
                if err.is_cancelled() {
                    return Err(err);
                }
                self.ctx.log(
                    LogLevel::Error,
                    format!(
                        "failed while handling message {} from '{}' ({} items)",
                        message.sequence_number(),
                        message.origin_id(),
                        message.payload().len()
                    ),
                );
                return Err(err);
            }
            self.ctx.tracker.after_handle(
                &self.ctx.execution_id,
                &self.ctx.step,
                &message,
                self.router.statistics(),
            );

            if complete {
                break;
            }
        }

        if !self.router.is_closed() {
            tracing::warn!(step = %self.ctx.step.id, "component ended its stream without a last message");
            self.ctx.log(
                LogLevel::Warn,
                "component did not send a last message; sending an empty one",
            );
            self.router.put(Message::empty().last(true))?;
        }
        Ok(())
    }
}

/// Drive a single component inline over the given messages.
///
/// Starts the component, handles each message in order and always stops it.
/// Useful for exercising a component without building a flow.
pub fn run_component(
    component: &mut dyn Component,
    ctx: &ComponentContext,
    messages: impl IntoIterator<Item = Message>,
    target: &mut dyn MessageTarget,
) -> Result<(), ComponentError> {
    let result = start_and_handle(component, ctx, messages, target);
    component.stop();
    result
}

fn start_and_handle(
    component: &mut dyn Component,
    ctx: &ComponentContext,
    messages: impl IntoIterator<Item = Message>,
    target: &mut dyn MessageTarget,
) -> Result<(), ComponentError> {
    component.start(ctx)?;
    for message in messages {
        let boundary = message.is_last();
        component.handle(&message, target, boundary)?;
    }
    Ok(())
}
