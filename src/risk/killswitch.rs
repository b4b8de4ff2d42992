//! Drawdown breach handling and kill-switch engagement.
//!
//! Evaluated opportunistically during deployment reads. Once triggered, the
//! switch stays triggered until manually cleared; the caller is responsible
//! for issuing the stop against the offending deployment.

use serde_json::json;
use std::sync::Arc;

use crate::errors::PlatformApiError;
use crate::models::{utc_now, RequestContext};
use crate::risk::policy::{validate_risk_policy, RiskPolicyMode};
use crate::store::StateStore;

/// Evaluates runtime drawdown and mutates kill-switch state on breaches.
pub struct RiskKillSwitchService {
    store: Arc<StateStore>,
}

impl RiskKillSwitchService {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Returns true when the kill-switch is (or becomes) triggered for this
    /// deployment's observed drawdown. Only an enforced policy with the
    /// switch enabled can engage it.
    pub fn evaluate_drawdown_breach(
        &self,
        deployment_id: &str,
        capital: f64,
        latest_pnl: Option<f64>,
        context: &RequestContext,
    ) -> Result<bool, PlatformApiError> {
        let document = self.store.risk_policy_document();
        let policy = validate_risk_policy(&document).map_err(|err| {
            PlatformApiError::new(
                500,
                "RISK_POLICY_INVALID",
                format!("Risk policy validation failed: {err}"),
                &context.request_id,
            )
        })?;

        if policy.mode != RiskPolicyMode::Enforced {
            return Ok(false);
        }
        if !policy.kill_switch.enabled {
            return Ok(false);
        }
        if policy.kill_switch.triggered {
            return Ok(true);
        }

        let latest_pnl = match latest_pnl {
            Some(pnl) if capital > 0.0 && pnl < 0.0 => pnl,
            _ => return Ok(false),
        };

        let drawdown_pct = (latest_pnl.abs() / capital) * 100.0;
        if drawdown_pct < policy.limits.max_drawdown_pct {
            return Ok(false);
        }

        let mut document = self.store.risk_policy_document();
        document["killSwitch"]["triggered"] = json!(true);
        document["killSwitch"]["triggeredAt"] = json!(utc_now());
        document["killSwitch"]["reason"] = json!(format!(
            "Deployment {} drawdown {:.2}% breached limit {:.2}%.",
            deployment_id, drawdown_pct, policy.limits.max_drawdown_pct
        ));
        self.store.set_risk_policy_document(document);

        tracing::warn!(
            deployment_id,
            drawdown_pct,
            limit_pct = policy.limits.max_drawdown_pct,
            request_id = %context.request_id,
            tenant_id = %context.tenant_id,
            "Kill-switch engaged on drawdown breach"
        );
        Ok(true)
    }

    pub fn kill_switch_reason(&self) -> Option<String> {
        let document = self.store.risk_policy_document();
        document["killSwitch"]["reason"]
            .as_str()
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn context() -> RequestContext {
        RequestContext::new("req-ks-001", "tenant-a", "user-a")
    }

    fn set_drawdown_limit(store: &StateStore, pct: f64) {
        let mut doc = store.risk_policy_document();
        doc["limits"]["maxDrawdownPct"] = json!(pct);
        store.set_risk_policy_document(doc);
    }

    #[test]
    fn test_breach_triggers_and_records_reason() {
        let store = Arc::new(StateStore::new());
        set_drawdown_limit(&store, 5.0);
        let service = RiskKillSwitchService::new(store.clone());

        // 1000 loss on 20 000 capital is exactly the 5% limit.
        let triggered = service
            .evaluate_drawdown_breach("dep-001", 20_000.0, Some(-1_000.0), &context())
            .unwrap();
        assert!(triggered);

        let doc = store.risk_policy_document();
        assert_eq!(doc["killSwitch"]["triggered"], Value::Bool(true));
        let reason = doc["killSwitch"]["reason"].as_str().unwrap();
        assert!(reason.contains("dep-001"));
        assert!(reason.contains("5.00%"));
        assert!(doc["killSwitch"]["triggeredAt"].as_str().is_some());
        let policy = validate_risk_policy(&doc).unwrap();
        assert!(policy.kill_switch.triggered);
    }

    #[test]
    fn test_below_limit_does_not_trigger() {
        let store = Arc::new(StateStore::new());
        set_drawdown_limit(&store, 5.0);
        let service = RiskKillSwitchService::new(store.clone());

        let triggered = service
            .evaluate_drawdown_breach("dep-001", 20_000.0, Some(-100.0), &context())
            .unwrap();
        assert!(!triggered);
        assert_eq!(
            store.risk_policy_document()["killSwitch"]["triggered"],
            Value::Bool(false)
        );
    }

    #[test]
    fn test_positive_pnl_or_missing_pnl_never_triggers() {
        let store = Arc::new(StateStore::new());
        set_drawdown_limit(&store, 5.0);
        let service = RiskKillSwitchService::new(store);

        assert!(!service
            .evaluate_drawdown_breach("dep-001", 20_000.0, Some(5_000.0), &context())
            .unwrap());
        assert!(!service
            .evaluate_drawdown_breach("dep-001", 20_000.0, None, &context())
            .unwrap());
    }

    #[test]
    fn test_advisory_mode_does_not_engage() {
        let store = Arc::new(StateStore::new());
        let mut doc = store.risk_policy_document();
        doc["mode"] = json!("advisory");
        doc["limits"]["maxDrawdownPct"] = json!(5.0);
        store.set_risk_policy_document(doc);
        let service = RiskKillSwitchService::new(store);

        assert!(!service
            .evaluate_drawdown_breach("dep-001", 20_000.0, Some(-10_000.0), &context())
            .unwrap());
    }

    #[test]
    fn test_already_triggered_reports_true_without_overwriting_reason() {
        let store = Arc::new(StateStore::new());
        let mut doc = store.risk_policy_document();
        doc["killSwitch"]["triggered"] = json!(true);
        doc["killSwitch"]["triggeredAt"] = json!("2026-02-14T10:00:00Z");
        doc["killSwitch"]["reason"] = json!("earlier breach");
        store.set_risk_policy_document(doc);
        let service = RiskKillSwitchService::new(store.clone());

        assert!(service
            .evaluate_drawdown_breach("dep-002", 20_000.0, Some(-1.0), &context())
            .unwrap());
        assert_eq!(service.kill_switch_reason().as_deref(), Some("earlier breach"));
    }
}
