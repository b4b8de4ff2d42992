//! Risk decision audit trail persistence.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{utc_now, RequestContext, RiskAuditRecord};
use crate::store::StateStore;

/// Persists machine-readable allow/block decisions for risk checks.
pub struct RiskAuditService {
    store: Arc<StateStore>,
}

impl RiskAuditService {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_decision(
        &self,
        decision: &str,
        check_type: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        context: &RequestContext,
        policy_version: Option<&str>,
        policy_mode: Option<&str>,
        outcome_code: Option<&str>,
        reason: Option<&str>,
        metadata: HashMap<String, Value>,
    ) -> RiskAuditRecord {
        let record = RiskAuditRecord {
            id: self.store.next_id("risk-audit"),
            decision: decision.to_string(),
            check_type: check_type.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.map(str::to_string),
            request_id: context.request_id.clone(),
            tenant_id: context.tenant_id.clone(),
            user_id: context.user_id.clone(),
            policy_version: policy_version.map(str::to_string),
            policy_mode: policy_mode.map(str::to_string),
            outcome_code: outcome_code.map(str::to_string),
            reason: reason.map(str::to_string),
            metadata,
            created_at: utc_now(),
        };
        self.store.risk_audit_trail.write().push(record.clone());
        record
    }

    pub fn list_for_tenant(&self, context: &RequestContext) -> Vec<RiskAuditRecord> {
        self.store
            .risk_audit_trail
            .read()
            .iter()
            .filter(|record| record.tenant_id == context.tenant_id)
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub fn record_count(&self) -> usize {
        self.store.risk_audit_trail.read().len()
    }
}
