//! Orchestrator execution trace persistence.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{utc_now, OrchestratorTraceRecord};
use crate::store::StateStore;

/// Identity attached to orchestrator trace records. Background transitions
/// use the system identity; request-driven transitions carry the caller's.
#[derive(Debug, Clone)]
pub struct TraceIdentity {
    pub request_id: String,
    pub tenant_id: String,
    pub user_id: String,
}

impl Default for TraceIdentity {
    fn default() -> Self {
        Self {
            request_id: "system-orchestrator".to_string(),
            tenant_id: "tenant-local".to_string(),
            user_id: "user-local".to_string(),
        }
    }
}

/// Persists deterministic orchestrator execution trace records.
pub struct OrchestratorTraceService {
    store: Arc<StateStore>,
    identity: TraceIdentity,
}

impl OrchestratorTraceService {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            store,
            identity: TraceIdentity::default(),
        }
    }

    pub fn with_identity(store: Arc<StateStore>, identity: TraceIdentity) -> Self {
        Self { store, identity }
    }

    pub fn record(
        &self,
        run_id: &str,
        event: &str,
        step: &str,
        from_state: Option<&str>,
        to_state: Option<&str>,
        metadata: HashMap<String, Value>,
    ) -> OrchestratorTraceRecord {
        let trace = OrchestratorTraceRecord {
            id: self.store.next_id("orch-trace"),
            run_id: run_id.to_string(),
            event: event.to_string(),
            step: step.to_string(),
            from_state: from_state.map(str::to_string),
            to_state: to_state.map(str::to_string),
            request_id: self.identity.request_id.clone(),
            tenant_id: self.identity.tenant_id.clone(),
            user_id: self.identity.user_id.clone(),
            metadata,
            created_at: utc_now(),
        };
        self.store.orchestrator_traces.write().push(trace.clone());
        trace
    }

    pub fn list_run_traces(&self, run_id: &str) -> Vec<OrchestratorTraceRecord> {
        self.store
            .orchestrator_traces
            .read()
            .iter()
            .filter(|trace| trace.run_id == run_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_ids_are_prefixed_and_monotonic() {
        let store = Arc::new(StateStore::new());
        let service = OrchestratorTraceService::new(store);
        let first = service.record("run-1", "run_received", "enqueue", None, Some("received"), HashMap::new());
        let second = service.record("run-1", "state_transition", "enqueue", Some("received"), Some("queued"), HashMap::new());
        assert_eq!(first.id, "orch-trace-0001");
        assert_eq!(second.id, "orch-trace-0002");
        assert_eq!(service.list_run_traces("run-1").len(), 2);
    }

    #[test]
    fn test_default_identity_is_system_scoped() {
        let store = Arc::new(StateStore::new());
        let service = OrchestratorTraceService::new(store);
        let trace = service.record("run-2", "run_received", "enqueue", None, None, HashMap::new());
        assert_eq!(trace.request_id, "system-orchestrator");
        assert_eq!(trace.tenant_id, "tenant-local");
        assert_eq!(trace.user_id, "user-local");
    }
}
