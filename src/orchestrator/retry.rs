//! Retry and failure budgets for orchestrator runs.
//!
//! Backoff doubles from the base per recorded failure, capped at the
//! configured maximum. Exhausting either budget terminates the run; the
//! failure budget can terminate a run while attempts remain.

use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::orchestrator::trace::{OrchestratorTraceService, TraceIdentity};
use crate::store::StateStore;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Run {run_id} is terminal; no further attempts are allowed.")]
pub struct RetryBudgetError {
    pub run_id: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryBudgetPolicy {
    pub max_attempts: u32,
    pub max_failures: u32,
    pub base_backoff_seconds: u64,
    pub max_backoff_seconds: u64,
}

impl Default for RetryBudgetPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_failures: 3,
            base_backoff_seconds: 2,
            max_backoff_seconds: 30,
        }
    }
}

/// Decision produced by `record_failure`.
#[derive(Debug, Clone)]
pub struct RetryDecision {
    pub retry_allowed: bool,
    pub terminal: bool,
    pub next_state: String,
    pub retry_after_seconds: Option<u64>,
    pub reason: Option<String>,
}

/// Per-run retry bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct RetryStateSnapshot {
    pub attempts: u32,
    pub failures: u32,
    pub succeeded: bool,
    pub terminal: bool,
}

/// Deterministic retry budget enforcement with trace emission.
pub struct OrchestratorRetryService {
    policy: RetryBudgetPolicy,
    store: Arc<StateStore>,
    traces: OrchestratorTraceService,
    states: Mutex<HashMap<String, RetryStateSnapshot>>,
}

impl OrchestratorRetryService {
    pub fn new(store: Arc<StateStore>, policy: RetryBudgetPolicy) -> Self {
        Self {
            policy,
            traces: OrchestratorTraceService::new(store.clone()),
            store,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_identity(
        store: Arc<StateStore>,
        policy: RetryBudgetPolicy,
        identity: TraceIdentity,
    ) -> Self {
        Self {
            policy,
            traces: OrchestratorTraceService::with_identity(store.clone(), identity),
            store,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Start an attempt for a run. Terminal runs reject further attempts.
    pub fn begin_attempt(&self, run_id: &str) -> Result<(), RetryBudgetError> {
        {
            let mut states = self.states.lock();
            let state = states.entry(run_id.to_string()).or_default();
            if state.terminal {
                return Err(RetryBudgetError {
                    run_id: run_id.to_string(),
                });
            }
            state.attempts += 1;
        }
        self.sync_run_counters(run_id);
        self.traces.record(
            run_id,
            "retry_attempt_started",
            "retry",
            None,
            None,
            HashMap::new(),
        );
        Ok(())
    }

    /// Record a failed attempt and decide whether a retry is allowed.
    pub fn record_failure(&self, run_id: &str) -> RetryDecision {
        let (snapshot, already_succeeded) = {
            let mut states = self.states.lock();
            let state = states.entry(run_id.to_string()).or_default();
            if state.succeeded {
                state.terminal = true;
                (state.clone(), true)
            } else {
                state.failures += 1;
                (state.clone(), false)
            }
        };
        self.sync_run_counters(run_id);

        if already_succeeded {
            let decision = RetryDecision {
                retry_allowed: false,
                terminal: true,
                next_state: "completed".to_string(),
                retry_after_seconds: None,
                reason: Some("retry_succeeded".to_string()),
            };
            self.trace_terminal(run_id, &decision);
            return decision;
        }

        self.traces.record(
            run_id,
            "retry_failure_recorded",
            "retry",
            None,
            None,
            HashMap::from([("failures".to_string(), json!(snapshot.failures))]),
        );

        let exhausted_reason = if snapshot.attempts >= self.policy.max_attempts {
            Some("attempt_budget_exhausted")
        } else if snapshot.failures >= self.policy.max_failures {
            Some("failure_budget_exhausted")
        } else {
            None
        };

        if let Some(reason) = exhausted_reason {
            self.states
                .lock()
                .entry(run_id.to_string())
                .and_modify(|state| state.terminal = true);
            let decision = RetryDecision {
                retry_allowed: false,
                terminal: true,
                next_state: "failed".to_string(),
                retry_after_seconds: None,
                reason: Some(reason.to_string()),
            };
            self.trace_terminal(run_id, &decision);
            return decision;
        }

        let retry_after = self.backoff_seconds(snapshot.failures);
        let decision = RetryDecision {
            retry_allowed: true,
            terminal: false,
            next_state: "awaiting_tool".to_string(),
            retry_after_seconds: Some(retry_after),
            reason: None,
        };
        self.traces.record(
            run_id,
            "retry_scheduled",
            "retry",
            None,
            Some("awaiting_tool"),
            HashMap::from([("retryAfterSeconds".to_string(), json!(retry_after))]),
        );
        decision
    }

    /// Record a successful attempt; the run's retry state becomes terminal.
    pub fn record_success(&self, run_id: &str) -> RetryStateSnapshot {
        let snapshot = {
            let mut states = self.states.lock();
            let state = states.entry(run_id.to_string()).or_default();
            state.succeeded = true;
            state.terminal = true;
            state.clone()
        };
        self.traces.record(
            run_id,
            "retry_success",
            "retry",
            None,
            Some("completed"),
            HashMap::new(),
        );
        snapshot
    }

    pub fn snapshot(&self, run_id: &str) -> RetryStateSnapshot {
        self.states.lock().get(run_id).cloned().unwrap_or_default()
    }

    /// Mirror attempt/failure counters onto the stored run record when the
    /// run is queue-managed.
    fn sync_run_counters(&self, run_id: &str) {
        let snapshot = self.states.lock().get(run_id).cloned().unwrap_or_default();
        if let Some(run) = self.store.orchestrator_runs.write().get_mut(run_id) {
            run.attempts = snapshot.attempts;
            run.failures = snapshot.failures;
        }
    }

    fn backoff_seconds(&self, failures: u32) -> u64 {
        let doublings = failures.saturating_sub(1).min(32);
        let backoff = self.policy.base_backoff_seconds.saturating_mul(1u64 << doublings);
        backoff.min(self.policy.max_backoff_seconds)
    }

    fn trace_terminal(&self, run_id: &str, decision: &RetryDecision) {
        let mut metadata = HashMap::new();
        if let Some(reason) = &decision.reason {
            metadata.insert("reason".to_string(), json!(reason));
        }
        self.traces.record(
            run_id,
            "retry_terminal_decision",
            "retry",
            None,
            Some(&decision.next_state),
            metadata,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(policy: RetryBudgetPolicy) -> (OrchestratorRetryService, Arc<StateStore>) {
        let store = Arc::new(StateStore::new());
        (OrchestratorRetryService::new(store.clone(), policy), store)
    }

    #[test]
    fn test_backoff_doubles_and_attempt_budget_terminates() {
        let (retry, _) = service(RetryBudgetPolicy {
            max_attempts: 3,
            max_failures: 3,
            base_backoff_seconds: 2,
            max_backoff_seconds: 30,
        });

        retry.begin_attempt("orch-001").unwrap();
        let first = retry.record_failure("orch-001");
        assert!(first.retry_allowed);
        assert_eq!(first.next_state, "awaiting_tool");
        assert_eq!(first.retry_after_seconds, Some(2));

        retry.begin_attempt("orch-001").unwrap();
        let second = retry.record_failure("orch-001");
        assert!(second.retry_allowed);
        assert_eq!(second.retry_after_seconds, Some(4));

        retry.begin_attempt("orch-001").unwrap();
        let third = retry.record_failure("orch-001");
        assert!(!third.retry_allowed);
        assert!(third.terminal);
        assert_eq!(third.next_state, "failed");
        assert_eq!(third.reason.as_deref(), Some("attempt_budget_exhausted"));
    }

    #[test]
    fn test_failure_budget_terminates_while_attempts_remain() {
        let (retry, _) = service(RetryBudgetPolicy {
            max_attempts: 5,
            max_failures: 2,
            base_backoff_seconds: 1,
            max_backoff_seconds: 30,
        });

        retry.begin_attempt("orch-002").unwrap();
        assert!(retry.record_failure("orch-002").retry_allowed);

        retry.begin_attempt("orch-002").unwrap();
        let second = retry.record_failure("orch-002");
        assert!(!second.retry_allowed);
        assert!(second.terminal);
        assert_eq!(second.reason.as_deref(), Some("failure_budget_exhausted"));
    }

    #[test]
    fn test_begin_attempt_fails_after_terminal_state() {
        let (retry, _) = service(RetryBudgetPolicy {
            max_attempts: 1,
            max_failures: 1,
            base_backoff_seconds: 2,
            max_backoff_seconds: 30,
        });

        retry.begin_attempt("orch-003").unwrap();
        assert!(retry.record_failure("orch-003").terminal);
        assert!(retry.begin_attempt("orch-003").is_err());
    }

    #[test]
    fn test_success_marks_retry_state_terminal() {
        let (retry, _) = service(RetryBudgetPolicy::default());
        retry.begin_attempt("orch-004").unwrap();
        let state = retry.record_success("orch-004");
        assert!(state.terminal);

        let snapshot = retry.snapshot("orch-004");
        assert_eq!(snapshot.attempts, 1);
        assert_eq!(snapshot.failures, 0);
        assert!(snapshot.terminal);
    }

    #[test]
    fn test_backoff_is_capped_at_maximum() {
        let (retry, _) = service(RetryBudgetPolicy {
            max_attempts: 10,
            max_failures: 10,
            base_backoff_seconds: 8,
            max_backoff_seconds: 20,
        });
        for _ in 0..3 {
            retry.begin_attempt("orch-cap").unwrap();
            retry.record_failure("orch-cap");
        }
        let snapshot = retry.snapshot("orch-cap");
        assert_eq!(snapshot.failures, 3);
        // 8 -> 16 -> capped 20
        retry.begin_attempt("orch-cap").unwrap();
        let decision = retry.record_failure("orch-cap");
        assert_eq!(decision.retry_after_seconds, Some(20));
    }

    #[test]
    fn test_trace_sequence_for_retry_and_terminal_failure() {
        let (retry, store) = service(RetryBudgetPolicy {
            max_attempts: 2,
            max_failures: 2,
            base_backoff_seconds: 1,
            max_backoff_seconds: 30,
        });

        retry.begin_attempt("orch-retry-001").unwrap();
        retry.record_failure("orch-retry-001");
        retry.begin_attempt("orch-retry-001").unwrap();
        let terminal = retry.record_failure("orch-retry-001");
        assert_eq!(terminal.reason.as_deref(), Some("attempt_budget_exhausted"));

        let traces: Vec<String> = store
            .orchestrator_traces
            .read()
            .iter()
            .filter(|t| t.run_id == "orch-retry-001")
            .map(|t| t.event.clone())
            .collect();
        assert_eq!(
            traces,
            vec![
                "retry_attempt_started",
                "retry_failure_recorded",
                "retry_scheduled",
                "retry_attempt_started",
                "retry_failure_recorded",
                "retry_terminal_decision",
            ]
        );
        let last = store.orchestrator_traces.read().last().cloned().unwrap();
        assert_eq!(last.to_state.as_deref(), Some("failed"));
        assert_eq!(last.metadata["reason"], json!("attempt_budget_exhausted"));
    }

    #[test]
    fn test_failure_after_success_preserves_completed_reason() {
        let (retry, store) = service(RetryBudgetPolicy::default());
        retry.begin_attempt("orch-success-001").unwrap();
        retry.record_success("orch-success-001");
        let decision = retry.record_failure("orch-success-001");

        assert_eq!(decision.next_state, "completed");
        assert_eq!(decision.reason.as_deref(), Some("retry_succeeded"));

        let events: Vec<String> = store
            .orchestrator_traces
            .read()
            .iter()
            .filter(|t| t.run_id == "orch-success-001")
            .map(|t| t.event.clone())
            .collect();
        assert_eq!(
            events,
            vec!["retry_attempt_started", "retry_success", "retry_terminal_decision"]
        );
        let last = store.orchestrator_traces.read().last().cloned().unwrap();
        assert_eq!(last.to_state.as_deref(), Some("completed"));
        assert_eq!(last.metadata["reason"], json!("retry_succeeded"));
    }
}
