//! Execution history and retention purge.
//!
//! [`MemoryExecutionStore`] is both a tracker (it records executions, steps
//! and log lines as they happen) and an [`ExecutionStore`] that can purge
//! old history.

use crate::component::ComponentStatistics;
use crate::flow::{Flow, FlowStep};
use crate::tracking::{ExecutionStatus, ExecutionTracker, LogLevel};
use indexmap::IndexMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// One flow execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub id: String,
    pub flow_id: String,
    pub status: ExecutionStatus,
    pub cause: Option<String>,
    pub started_at: SystemTime,
    pub updated_at: SystemTime,
}

/// One step of an execution.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub execution_id: String,
    pub step_id: String,
    pub status: ExecutionStatus,
    pub cause: Option<String>,
    pub statistics: ComponentStatistics,
    pub updated_at: SystemTime,
}

/// One log line of an execution.
#[derive(Debug, Clone, PartialEq)]
pub struct StepLog {
    pub execution_id: String,
    pub step_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    pub logged_at: SystemTime,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("execution store lock poisoned")]
    Poisoned,

    #[error("retention of {0:?} reaches before the epoch")]
    Retention(Duration),
}

/// Persistent execution history.
pub trait ExecutionStore: Send + Sync {
    /// Delete finished executions with `status` whose last update is older
    /// than `retention`, with their steps and logs.
    ///
    /// Returns the number of rows deleted across all three tables.
    fn purge(&self, status: ExecutionStatus, retention: Duration) -> Result<usize, StoreError> {
        let cutoff = SystemTime::now()
            .checked_sub(retention)
            .ok_or(StoreError::Retention(retention))?;
        self.purge_before(status, cutoff)
    }

    /// Delete finished executions with `status` last updated before `cutoff`.
    fn purge_before(&self, status: ExecutionStatus, cutoff: SystemTime) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
struct History {
    executions: IndexMap<String, ExecutionRecord>,
    steps: Vec<StepRecord>,
    logs: Vec<StepLog>,
}

/// In-process execution history.
#[derive(Debug)]
pub struct MemoryExecutionStore {
    history: Option<Mutex<History>>,
}

impl Default for MemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self {
            history: Some(Mutex::new(History::default())),
        }
    }

    /// A store with no backing tables: records nothing, purges nothing.
    pub fn unprovisioned() -> Self {
        Self { history: None }
    }

    pub fn is_provisioned(&self) -> bool {
        self.history.is_some()
    }

    pub fn execution(&self, execution_id: &str) -> Option<ExecutionRecord> {
        self.read(|h| h.executions.get(execution_id).cloned())
            .flatten()
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.read(|h| h.executions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn steps(&self, execution_id: &str) -> Vec<StepRecord> {
        self.read(|h| {
            h.steps
                .iter()
                .filter(|s| s.execution_id == execution_id)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn logs(&self, execution_id: &str) -> Vec<StepLog> {
        self.read(|h| {
            h.logs
                .iter()
                .filter(|l| l.execution_id == execution_id)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }

    fn read<T>(&self, f: impl FnOnce(&History) -> T) -> Option<T> {
        let history = self.history.as_ref()?.lock().ok()?;
        Some(f(&history))
    }

    fn write(&self, f: impl FnOnce(&mut History)) {
        if let Some(Ok(mut history)) = self.history.as_ref().map(|h| h.lock()) {
            f(&mut history);
        }
    }
}

impl ExecutionStore for MemoryExecutionStore {
    fn purge_before(&self, status: ExecutionStatus, cutoff: SystemTime) -> Result<usize, StoreError> {
        let Some(history) = self.history.as_ref() else {
            tracing::info!("execution store not provisioned, nothing to purge");
            return Ok(0);
        };
        if !status.is_terminal() {
            return Ok(0);
        }
        let mut history = history.lock().map_err(|_| StoreError::Poisoned)?;

        let expired: Vec<String> = history
            .executions
            .values()
            .filter(|e| e.status == status && e.updated_at < cutoff)
            .map(|e| e.id.clone())
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        let before = history.logs.len();
        history.logs.retain(|l| !expired.contains(&l.execution_id));
        let logs = before - history.logs.len();

        let before = history.steps.len();
        history.steps.retain(|s| !expired.contains(&s.execution_id));
        let steps = before - history.steps.len();

        for id in &expired {
            history.executions.shift_remove(id);
        }
        let executions = expired.len();

        let deleted = logs + steps + executions;
        tracing::info!(%status, executions, steps, logs, deleted, "purged execution history");
        Ok(deleted)
    }
}

impl ExecutionTracker for MemoryExecutionStore {
    fn before_flow(&self, execution_id: &str, flow: &Flow) {
        let now = SystemTime::now();
        self.write(|h| {
            h.executions.insert(
                execution_id.to_string(),
                ExecutionRecord {
                    id: execution_id.to_string(),
                    flow_id: flow.id.clone(),
                    status: ExecutionStatus::Running,
                    cause: None,
                    started_at: now,
                    updated_at: now,
                },
            );
        });
    }

    fn after_flow(&self, execution_id: &str, _flow: &Flow, status: ExecutionStatus, cause: Option<&str>) {
        self.write(|h| {
            if let Some(record) = h.executions.get_mut(execution_id) {
                record.status = status;
                record.cause = cause.map(str::to_string);
                record.updated_at = SystemTime::now();
            }
        });
    }

    fn step_started(&self, execution_id: &str, step: &FlowStep) {
        self.write(|h| {
            h.steps.push(StepRecord {
                execution_id: execution_id.to_string(),
                step_id: step.id.clone(),
                status: ExecutionStatus::Running,
                cause: None,
                statistics: ComponentStatistics::default(),
                updated_at: SystemTime::now(),
            });
        });
    }

    fn step_finished(
        &self,
        execution_id: &str,
        step: &FlowStep,
        status: ExecutionStatus,
        cause: Option<&str>,
        statistics: &ComponentStatistics,
    ) {
        self.write(|h| {
            if let Some(record) = h
                .steps
                .iter_mut()
                .find(|s| s.execution_id == execution_id && s.step_id == step.id)
            {
                record.status = status;
                record.cause = cause.map(str::to_string);
                record.statistics = statistics.clone();
                record.updated_at = SystemTime::now();
            }
        });
    }

    fn log(&self, execution_id: &str, level: LogLevel, step_id: Option<&str>, message: &str) {
        self.write(|h| {
            h.logs.push(StepLog {
                execution_id: execution_id.to_string(),
                step_id: step_id.map(str::to_string),
                level,
                message: message.to_string(),
                logged_at: SystemTime::now(),
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(store: &MemoryExecutionStore, execution_id: &str, status: ExecutionStatus) {
        let flow = Flow::new("f");
        let a = FlowStep::new("a", "content");
        let b = FlowStep::new("b", "format-delimited");
        store.before_flow(execution_id, &flow);
        store.step_started(execution_id, &a);
        store.step_started(execution_id, &b);
        store.log(execution_id, LogLevel::Info, Some("a"), "one");
        store.log(execution_id, LogLevel::Info, Some("b"), "two");
        store.log(execution_id, LogLevel::Warn, None, "three");
        store.step_finished(execution_id, &a, status, None, &ComponentStatistics::default());
        store.step_finished(execution_id, &b, status, None, &ComponentStatistics::default());
        store.after_flow(execution_id, &flow, status, None);
    }

    #[test]
    fn test_records_execution() {
        let store = MemoryExecutionStore::new();
        run(&store, "x1", ExecutionStatus::Done);

        let record = store.execution("x1").unwrap();
        assert_eq!(record.status, ExecutionStatus::Done);
        assert_eq!(record.flow_id, "f");
        assert_eq!(store.steps("x1").len(), 2);
        assert_eq!(store.logs("x1").len(), 3);
    }

    #[test]
    fn test_purge_cascades_and_counts() {
        let store = MemoryExecutionStore::new();
        run(&store, "x1", ExecutionStatus::Done);
        run(&store, "x2", ExecutionStatus::Error);
        run(&store, "x3", ExecutionStatus::Done);

        let cutoff = SystemTime::now() + Duration::from_secs(60);
        let deleted = store.purge_before(ExecutionStatus::Done, cutoff).unwrap();

        // 2 executions × (1 execution + 2 steps + 3 logs)
        assert_eq!(deleted, 12);
        assert!(store.execution("x1").is_none());
        assert!(store.logs("x3").is_empty());
        assert_eq!(store.steps("x2").len(), 2);
        assert_eq!(store.executions().len(), 1);
    }

    #[test]
    fn test_purge_respects_retention() {
        let store = MemoryExecutionStore::new();
        run(&store, "x1", ExecutionStatus::Done);

        let deleted = store
            .purge(ExecutionStatus::Done, Duration::from_secs(3600))
            .unwrap();
        assert_eq!(deleted, 0);
        assert!(store.execution("x1").is_some());
    }

    #[test]
    fn test_purge_skips_running() {
        let store = MemoryExecutionStore::new();
        store.before_flow("x1", &Flow::new("f"));

        let cutoff = SystemTime::now() + Duration::from_secs(60);
        assert_eq!(store.purge_before(ExecutionStatus::Running, cutoff).unwrap(), 0);
        assert!(store.execution("x1").is_some());
    }

    #[test]
    fn test_unprovisioned_store() {
        let store = MemoryExecutionStore::unprovisioned();
        run(&store, "x1", ExecutionStatus::Done);

        assert!(!store.is_provisioned());
        assert!(store.executions().is_empty());
        assert_eq!(store.purge(ExecutionStatus::Done, Duration::ZERO).unwrap(), 0);
    }
}
