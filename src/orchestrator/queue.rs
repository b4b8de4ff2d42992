//! Orchestrator priority queue with FSM-validated transitions.
//!
//! Numeric priority dequeues lowest first; ties break FIFO by enqueue order.
//! Cancelled items stay in the heap and are skipped on pop. Every transition
//! is validated against the orchestrator FSM and persisted as a trace.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use crate::lifecycle::{
    orchestrator_transition, OrchestratorTransitionError, ORCHESTRATOR_INITIAL_STATE,
};
use crate::models::{utc_now, OrchestratorRunRecord};
use crate::orchestrator::trace::{OrchestratorTraceService, TraceIdentity};
use crate::store::StateStore;

/// Priority queue and lifecycle driver for orchestrator runs.
pub struct OrchestratorQueueService {
    store: Arc<StateStore>,
    traces: OrchestratorTraceService,
    heap: Mutex<BinaryHeap<Reverse<(i64, u64, String)>>>,
    sequence: Mutex<u64>,
}

impl OrchestratorQueueService {
    pub fn new(store: Arc<StateStore>) -> Self {
        let traces = OrchestratorTraceService::new(store.clone());
        Self::with_traces(store, traces)
    }

    pub fn with_identity(store: Arc<StateStore>, identity: TraceIdentity) -> Self {
        let traces = OrchestratorTraceService::with_identity(store.clone(), identity);
        Self::with_traces(store, traces)
    }

    fn with_traces(store: Arc<StateStore>, traces: OrchestratorTraceService) -> Self {
        Self {
            store,
            traces,
            heap: Mutex::new(BinaryHeap::new()),
            sequence: Mutex::new(0),
        }
    }

    /// Create a run in `received`, then queue it.
    pub fn enqueue(
        &self,
        run_id: &str,
        priority: i64,
        payload: Value,
    ) -> Result<OrchestratorRunRecord, OrchestratorTransitionError> {
        let now = utc_now();
        let run = OrchestratorRunRecord {
            id: run_id.to_string(),
            state: ORCHESTRATOR_INITIAL_STATE.to_string(),
            priority,
            attempts: 0,
            failures: 0,
            cancellation_reason: None,
            payload,
            created_at: now.clone(),
            updated_at: now,
        };
        self.store
            .orchestrator_runs
            .write()
            .insert(run_id.to_string(), run);
        self.traces.record(
            run_id,
            "run_received",
            "enqueue",
            None,
            Some(ORCHESTRATOR_INITIAL_STATE),
            HashMap::new(),
        );

        let run = self.transition(run_id, "queued", "enqueue", HashMap::new())?;

        let sequence = {
            let mut counter = self.sequence.lock();
            *counter += 1;
            *counter
        };
        self.heap
            .lock()
            .push(Reverse((priority, sequence, run_id.to_string())));
        Ok(run)
    }

    /// Pop the next runnable item and move it to `executing`. Cancelled
    /// entries are discarded as they surface.
    pub fn dequeue_next(&self) -> Option<OrchestratorRunRecord> {
        loop {
            let candidate = self.heap.lock().pop()?;
            let Reverse((_, _, run_id)) = candidate;
            let state = self
                .store
                .orchestrator_runs
                .read()
                .get(&run_id)
                .map(|run| run.state.clone());
            match state.as_deref() {
                Some("queued") => {
                    // Transition out of queued can't fail once the state check passed.
                    if let Ok(run) = self.transition(&run_id, "executing", "dequeue", HashMap::new())
                    {
                        return Some(run);
                    }
                }
                _ => continue,
            }
        }
    }

    pub fn mark_awaiting_tool(
        &self,
        run_id: &str,
    ) -> Result<OrchestratorRunRecord, OrchestratorTransitionError> {
        self.transition(run_id, "awaiting_tool", "await_tool", HashMap::new())
    }

    pub fn mark_awaiting_user_confirmation(
        &self,
        run_id: &str,
    ) -> Result<OrchestratorRunRecord, OrchestratorTransitionError> {
        self.transition(
            run_id,
            "awaiting_user_confirmation",
            "await_user_confirmation",
            HashMap::new(),
        )
    }

    pub fn resume(
        &self,
        run_id: &str,
    ) -> Result<OrchestratorRunRecord, OrchestratorTransitionError> {
        self.transition(run_id, "executing", "resume", HashMap::new())
    }

    pub fn complete(
        &self,
        run_id: &str,
    ) -> Result<OrchestratorRunRecord, OrchestratorTransitionError> {
        self.transition(run_id, "completed", "complete", HashMap::new())
    }

    pub fn fail(
        &self,
        run_id: &str,
        reason: &str,
    ) -> Result<OrchestratorRunRecord, OrchestratorTransitionError> {
        let metadata = HashMap::from([("reason".to_string(), json!(reason))]);
        self.transition(run_id, "failed", "fail", metadata)
    }

    /// Cooperative cancel: allowed from every non-terminal state. Cancelling
    /// a queued item prevents it from ever executing.
    pub fn cancel(
        &self,
        run_id: &str,
        reason: &str,
    ) -> Result<OrchestratorRunRecord, OrchestratorTransitionError> {
        let metadata = HashMap::from([("reason".to_string(), json!(reason))]);
        let run = self.transition(run_id, "cancelled", "cancel", metadata)?;
        if let Some(record) = self.store.orchestrator_runs.write().get_mut(run_id) {
            record.cancellation_reason = Some(reason.to_string());
        }
        let mut run = run;
        run.cancellation_reason = Some(reason.to_string());
        Ok(run)
    }

    pub fn get_run(&self, run_id: &str) -> Option<OrchestratorRunRecord> {
        self.store.orchestrator_runs.read().get(run_id).cloned()
    }

    pub fn list_run_traces(&self, run_id: &str) -> Vec<crate::models::OrchestratorTraceRecord> {
        self.traces.list_run_traces(run_id)
    }

    fn transition(
        &self,
        run_id: &str,
        target: &str,
        step: &str,
        metadata: HashMap<String, Value>,
    ) -> Result<OrchestratorRunRecord, OrchestratorTransitionError> {
        let mut runs = self.store.orchestrator_runs.write();
        let run = runs.get_mut(run_id).ok_or_else(|| OrchestratorTransitionError {
            from: "missing".to_string(),
            to: target.to_string(),
        })?;
        let from = run.state.clone();
        let next = orchestrator_transition(&from, target)?;
        run.state = next.clone();
        run.updated_at = utc_now();
        let snapshot = run.clone();
        drop(runs);

        self.traces.record(
            run_id,
            "state_transition",
            step,
            Some(&from),
            Some(&next),
            metadata,
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> OrchestratorQueueService {
        OrchestratorQueueService::new(Arc::new(StateStore::new()))
    }

    #[test]
    fn test_dequeues_lowest_priority_value_first() {
        let queue = service();
        queue.enqueue("orch-low", 50, Value::Null).unwrap();
        queue.enqueue("orch-high", 10, Value::Null).unwrap();
        queue.enqueue("orch-mid", 20, Value::Null).unwrap();

        assert_eq!(queue.dequeue_next().unwrap().id, "orch-high");
        assert_eq!(queue.dequeue_next().unwrap().id, "orch-mid");
        assert_eq!(queue.dequeue_next().unwrap().id, "orch-low");
        assert!(queue.dequeue_next().is_none());
    }

    #[test]
    fn test_fifo_within_same_priority() {
        let queue = service();
        queue.enqueue("orch-a", 20, Value::Null).unwrap();
        queue.enqueue("orch-b", 20, Value::Null).unwrap();
        queue.enqueue("orch-c", 20, Value::Null).unwrap();

        assert_eq!(queue.dequeue_next().unwrap().id, "orch-a");
        assert_eq!(queue.dequeue_next().unwrap().id, "orch-b");
        assert_eq!(queue.dequeue_next().unwrap().id, "orch-c");
    }

    #[test]
    fn test_cancel_before_dequeue_prevents_execution() {
        let queue = service();
        queue.enqueue("orch-queued", 5, Value::Null).unwrap();
        let cancelled = queue.cancel("orch-queued", "superseded").unwrap();
        assert_eq!(cancelled.state, "cancelled");
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("superseded"));
        assert!(queue.dequeue_next().is_none());
    }

    #[test]
    fn test_cancel_during_execution_is_allowed() {
        let queue = service();
        queue.enqueue("orch-exec", 5, Value::Null).unwrap();
        let executing = queue.dequeue_next().unwrap();
        assert_eq!(executing.state, "executing");

        let cancelled = queue.cancel("orch-exec", "manual override").unwrap();
        assert_eq!(cancelled.state, "cancelled");
    }

    #[test]
    fn test_terminal_run_cannot_be_cancelled() {
        let queue = service();
        queue.enqueue("orch-done", 10, Value::Null).unwrap();
        queue.dequeue_next().unwrap();
        queue.complete("orch-done").unwrap();
        assert!(queue.cancel("orch-done", "should fail").is_err());
    }

    #[test]
    fn test_queue_skips_cancelled_and_continues() {
        let queue = service();
        queue.enqueue("orch-a", 10, Value::Null).unwrap();
        queue.enqueue("orch-b", 20, Value::Null).unwrap();
        queue.cancel("orch-a", "duplicate").unwrap();
        assert_eq!(queue.dequeue_next().unwrap().id, "orch-b");
    }

    #[test]
    fn test_full_lifecycle_emits_expected_trace_sequence() {
        let queue = service();
        queue.enqueue("orch-trace-001", 7, json!({"scope": "dataset"})).unwrap();
        queue.dequeue_next().unwrap();
        queue.mark_awaiting_tool("orch-trace-001").unwrap();
        queue.resume("orch-trace-001").unwrap();
        queue.mark_awaiting_user_confirmation("orch-trace-001").unwrap();
        queue.resume("orch-trace-001").unwrap();
        queue.complete("orch-trace-001").unwrap();

        let traces = queue.list_run_traces("orch-trace-001");
        let events: Vec<&str> = traces.iter().map(|t| t.event.as_str()).collect();
        assert_eq!(
            events,
            vec![
                "run_received",
                "state_transition",
                "state_transition",
                "state_transition",
                "state_transition",
                "state_transition",
                "state_transition",
                "state_transition",
            ]
        );
        let steps: Vec<&str> = traces.iter().map(|t| t.step.as_str()).collect();
        assert_eq!(
            steps,
            vec![
                "enqueue",
                "enqueue",
                "dequeue",
                "await_tool",
                "resume",
                "await_user_confirmation",
                "resume",
                "complete",
            ]
        );
        let hops: Vec<(Option<&str>, Option<&str>)> = traces
            .iter()
            .map(|t| (t.from_state.as_deref(), t.to_state.as_deref()))
            .collect();
        assert_eq!(
            hops,
            vec![
                (None, Some("received")),
                (Some("received"), Some("queued")),
                (Some("queued"), Some("executing")),
                (Some("executing"), Some("awaiting_tool")),
                (Some("awaiting_tool"), Some("executing")),
                (Some("executing"), Some("awaiting_user_confirmation")),
                (Some("awaiting_user_confirmation"), Some("executing")),
                (Some("executing"), Some("completed")),
            ]
        );
        assert!(traces.iter().all(|t| t.id.starts_with("orch-trace-")));
        assert!(traces.iter().all(|t| t.request_id == "system-orchestrator"));
    }

    #[test]
    fn test_caller_identity_propagates_to_traces() {
        let store = Arc::new(StateStore::new());
        let queue = OrchestratorQueueService::with_identity(
            store,
            TraceIdentity {
                request_id: "req-orch-001".to_string(),
                tenant_id: "tenant-trace".to_string(),
                user_id: "user-trace".to_string(),
            },
        );
        queue.enqueue("orch-identity", 10, Value::Null).unwrap();
        queue.cancel("orch-identity", "manual_abort").unwrap();

        let traces = queue.list_run_traces("orch-identity");
        assert_eq!(traces.len(), 3);
        assert!(traces.iter().all(|t| t.request_id == "req-orch-001"));
        assert!(traces.iter().all(|t| t.tenant_id == "tenant-trace"));
        assert_eq!(traces[2].metadata["reason"], json!("manual_abort"));
    }
}
