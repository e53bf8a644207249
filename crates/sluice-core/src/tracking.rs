//! Execution tracking.
//!
//! The runtime reports execution and step lifecycle events, per-handle
//! hooks, and free-form log lines to an [`ExecutionTracker`]. Every method
//! has a no-op default so sinks implement only what they record.

use crate::component::ComponentStatistics;
use crate::flow::{Flow, FlowStep};
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a tracked log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Status of an execution or of one of its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Done,
    Error,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Done => "done",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Cancelled => "cancelled",
        })
    }
}

/// Sink for execution events. Called from every step's worker thread.
pub trait ExecutionTracker: Send + Sync {
    fn before_flow(&self, execution_id: &str, flow: &Flow) {
        let _ = (execution_id, flow);
    }

    fn after_flow(&self, execution_id: &str, flow: &Flow, status: ExecutionStatus, cause: Option<&str>) {
        let _ = (execution_id, flow, status, cause);
    }

    fn step_started(&self, execution_id: &str, step: &FlowStep) {
        let _ = (execution_id, step);
    }

    fn step_finished(
        &self,
        execution_id: &str,
        step: &FlowStep,
        status: ExecutionStatus,
        cause: Option<&str>,
        statistics: &ComponentStatistics,
    ) {
        let _ = (execution_id, step, status, cause, statistics);
    }

    fn before_handle(&self, execution_id: &str, step: &FlowStep, message: &Message) {
        let _ = (execution_id, step, message);
    }

    fn after_handle(
        &self,
        execution_id: &str,
        step: &FlowStep,
        message: &Message,
        statistics: &ComponentStatistics,
    ) {
        let _ = (execution_id, step, message, statistics);
    }

    fn log(&self, execution_id: &str, level: LogLevel, step_id: Option<&str>, message: &str) {
        let _ = (execution_id, level, step_id, message);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTracker;

impl ExecutionTracker for NoOpTracker {}

/// Forwards events to `tracing`, tagged with execution id and step.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracker;

impl ExecutionTracker for TracingTracker {
    fn before_flow(&self, execution_id: &str, flow: &Flow) {
        tracing::info!(execution_id, flow = %flow.id, steps = flow.steps.len(), "flow started");
    }

    fn after_flow(&self, execution_id: &str, flow: &Flow, status: ExecutionStatus, cause: Option<&str>) {
        match cause {
            Some(cause) => {
                tracing::error!(execution_id, flow = %flow.id, %status, cause, "flow finished")
            }
            None => tracing::info!(execution_id, flow = %flow.id, %status, "flow finished"),
        }
    }

    fn step_started(&self, execution_id: &str, step: &FlowStep) {
        tracing::debug!(execution_id, step = %step.id, component = %step.component_type, "step started");
    }

    fn step_finished(
        &self,
        execution_id: &str,
        step: &FlowStep,
        status: ExecutionStatus,
        cause: Option<&str>,
        statistics: &ComponentStatistics,
    ) {
        match cause {
            Some(cause) => tracing::error!(
                execution_id,
                step = %step.id,
                %status,
                cause,
                "step failed"
            ),
            None => tracing::debug!(
                execution_id,
                step = %step.id,
                %status,
                inbound = statistics.inbound_messages,
                outbound = statistics.outbound_messages,
                "step finished"
            ),
        }
    }

    fn before_handle(&self, execution_id: &str, step: &FlowStep, message: &Message) {
        tracing::trace!(
            execution_id,
            step = %step.id,
            origin = message.origin_id(),
            sequence = message.sequence_number(),
            items = message.payload().len(),
            last = message.is_last(),
            "handle"
        );
    }

    fn log(&self, execution_id: &str, level: LogLevel, step_id: Option<&str>, message: &str) {
        let step = step_id.unwrap_or("-");
        match level {
            LogLevel::Trace => tracing::trace!(execution_id, step, "{}", message),
            LogLevel::Debug => tracing::debug!(execution_id, step, "{}", message),
            LogLevel::Info => tracing::info!(execution_id, step, "{}", message),
            LogLevel::Warn => tracing::warn!(execution_id, step, "{}", message),
            LogLevel::Error => tracing::error!(execution_id, step, "{}", message),
        }
    }
}
