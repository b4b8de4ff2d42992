//! Pre-trade risk gate for execution side-effecting commands.
//!
//! Every side effect passes the kill-switch guard first, then the limit
//! checks for its command family. The policy document is re-validated on
//! each evaluation; an invalid policy blocks with a 500.

use std::sync::Arc;

use crate::errors::PlatformApiError;
use crate::models::{CreateDeploymentRequest, CreateOrderRequest, RequestContext};
use crate::risk::policy::{validate_risk_policy, RiskPolicy};
use crate::store::StateStore;

const ACTIVE_DEPLOYMENT_STATES: &[&str] = &["queued", "running", "paused"];

/// Validates policy and enforces pre-trade limits before execution side effects.
pub struct RiskPreTradeService {
    store: Arc<StateStore>,
}

impl RiskPreTradeService {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Gate for deployment creation: per-deployment capital and projected
    /// active capital must stay within `maxNotionalUsd`.
    pub fn ensure_deployment_allowed(
        &self,
        request: &CreateDeploymentRequest,
        context: &RequestContext,
    ) -> Result<RiskPolicy, PlatformApiError> {
        let policy = self.validated_policy(context)?;
        self.ensure_kill_switch_not_triggered(context)?;

        let active_capital: f64 = self
            .store
            .deployments
            .read()
            .values()
            .filter(|deployment| ACTIVE_DEPLOYMENT_STATES.contains(&deployment.status.as_str()))
            .map(|deployment| deployment.capital)
            .sum();
        let projected_total = active_capital + request.capital;

        if request.capital > policy.limits.max_notional_usd {
            return Err(limit_breach(
                context,
                format!(
                    "Deployment capital exceeds risk maxNotionalUsd ({} > {}).",
                    request.capital, policy.limits.max_notional_usd
                ),
            ));
        }
        if projected_total > policy.limits.max_notional_usd {
            return Err(limit_breach(
                context,
                format!(
                    "Projected active deployment capital exceeds risk maxNotionalUsd ({} > {}).",
                    projected_total, policy.limits.max_notional_usd
                ),
            ));
        }
        Ok(policy)
    }

    /// Gate for order placement: order notional, projected portfolio
    /// notional, and observed daily loss against the policy limits.
    pub fn ensure_order_allowed(
        &self,
        request: &CreateOrderRequest,
        context: &RequestContext,
    ) -> Result<RiskPolicy, PlatformApiError> {
        let policy = self.validated_policy(context)?;
        self.ensure_kill_switch_not_triggered(context)?;

        let order_notional = request.quantity * self.resolve_reference_price(request);
        if order_notional > policy.limits.max_position_notional_usd {
            return Err(limit_breach(
                context,
                format!(
                    "Order notional exceeds risk maxPositionNotionalUsd ({} > {}).",
                    order_notional, policy.limits.max_position_notional_usd
                ),
            ));
        }
        if order_notional > policy.limits.max_notional_usd {
            return Err(limit_breach(
                context,
                format!(
                    "Order notional exceeds risk maxNotionalUsd ({} > {}).",
                    order_notional, policy.limits.max_notional_usd
                ),
            ));
        }

        let mut portfolio_notional = 0.0;
        let mut daily_loss = 0.0;
        for portfolio in self.store.portfolios.read().values() {
            for position in &portfolio.positions {
                portfolio_notional += (position.quantity * position.current_price).abs();
            }
            if portfolio.pnl_total < 0.0 {
                daily_loss += portfolio.pnl_total.abs();
            }
        }

        let projected_notional = portfolio_notional + order_notional;
        if projected_notional > policy.limits.max_notional_usd {
            return Err(limit_breach(
                context,
                format!(
                    "Projected total notional exceeds risk maxNotionalUsd ({} > {}).",
                    projected_notional, policy.limits.max_notional_usd
                ),
            ));
        }
        if daily_loss >= policy.limits.max_daily_loss_usd {
            return Err(limit_breach(
                context,
                format!(
                    "Daily loss limit reached; new orders are blocked ({} >= {}).",
                    daily_loss, policy.limits.max_daily_loss_usd
                ),
            ));
        }
        Ok(policy)
    }

    fn validated_policy(&self, context: &RequestContext) -> Result<RiskPolicy, PlatformApiError> {
        let document = self.store.risk_policy_document();
        validate_risk_policy(&document).map_err(|err| {
            PlatformApiError::new(
                500,
                "RISK_POLICY_INVALID",
                format!("Risk policy validation failed: {err}"),
                &context.request_id,
            )
        })
    }

    fn ensure_kill_switch_not_triggered(
        &self,
        context: &RequestContext,
    ) -> Result<(), PlatformApiError> {
        let document = self.store.risk_policy_document();
        let kill_switch = &document["killSwitch"];
        let enabled = kill_switch["enabled"].as_bool().unwrap_or(false);
        let triggered = kill_switch["triggered"].as_bool().unwrap_or(false);
        if enabled && triggered {
            return Err(PlatformApiError::new(
                423,
                "RISK_KILL_SWITCH_ACTIVE",
                "Risk kill-switch is active; execution side effects are blocked.",
                &context.request_id,
            ));
        }
        Ok(())
    }

    /// Reference price for notional computation: explicit price when present,
    /// else the last-known position price for the symbol, else 0.
    fn resolve_reference_price(&self, request: &CreateOrderRequest) -> f64 {
        if let Some(price) = request.price {
            return price;
        }
        for portfolio in self.store.portfolios.read().values() {
            for position in &portfolio.positions {
                if position.symbol == request.symbol {
                    return position.current_price;
                }
            }
        }
        0.0
    }
}

fn limit_breach(context: &RequestContext, message: String) -> PlatformApiError {
    PlatformApiError::new(422, "RISK_LIMIT_BREACH", message, &context.request_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeploymentMode;
    use serde_json::json;

    fn context() -> RequestContext {
        RequestContext::new("req-pretrade-001", "tenant-a", "user-a")
    }

    fn order(quantity: f64, price: Option<f64>) -> CreateOrderRequest {
        CreateOrderRequest {
            symbol: "BTCUSDT".to_string(),
            side: "buy".to_string(),
            order_type: "limit".to_string(),
            quantity,
            price,
            deployment_id: None,
        }
    }

    fn set_limit(store: &StateStore, name: &str, value: f64) {
        let mut doc = store.risk_policy_document();
        doc["limits"][name] = json!(value);
        store.set_risk_policy_document(doc);
    }

    #[test]
    fn test_order_notional_exceeding_position_limit_is_blocked() {
        let store = Arc::new(StateStore::new());
        set_limit(&store, "maxPositionNotionalUsd", 1_000.0);
        let gate = RiskPreTradeService::new(store);

        let err = gate
            .ensure_order_allowed(&order(1.0, Some(64_000.0)), &context())
            .unwrap_err();
        assert_eq!(err.status_code, 422);
        assert_eq!(err.code, "RISK_LIMIT_BREACH");
    }

    #[test]
    fn test_order_within_limits_is_allowed() {
        let store = Arc::new(StateStore::new());
        let gate = RiskPreTradeService::new(store);
        assert!(gate.ensure_order_allowed(&order(0.01, Some(64_000.0)), &context()).is_ok());
    }

    #[test]
    fn test_market_order_uses_position_reference_price() {
        let store = Arc::new(StateStore::new());
        set_limit(&store, "maxPositionNotionalUsd", 1_000.0);
        let gate = RiskPreTradeService::new(store);

        // Seeded paper portfolio holds BTCUSDT at 64 000; 0.1 qty = 6 400 notional.
        let err = gate.ensure_order_allowed(&order(0.1, None), &context()).unwrap_err();
        assert_eq!(err.code, "RISK_LIMIT_BREACH");
    }

    #[test]
    fn test_unknown_symbol_without_price_has_zero_notional() {
        let store = Arc::new(StateStore::new());
        set_limit(&store, "maxPositionNotionalUsd", 1.0);
        let gate = RiskPreTradeService::new(store);

        let request = CreateOrderRequest {
            symbol: "DOGEUSDT".to_string(),
            side: "buy".to_string(),
            order_type: "market".to_string(),
            quantity: 10.0,
            price: None,
            deployment_id: None,
        };
        assert!(gate.ensure_order_allowed(&request, &context()).is_ok());
    }

    #[test]
    fn test_triggered_kill_switch_blocks_with_423() {
        let store = Arc::new(StateStore::new());
        let mut doc = store.risk_policy_document();
        doc["killSwitch"]["triggered"] = json!(true);
        doc["killSwitch"]["triggeredAt"] = json!("2026-02-14T10:00:00Z");
        doc["killSwitch"]["reason"] = json!("manual halt");
        store.set_risk_policy_document(doc);
        let gate = RiskPreTradeService::new(store);

        let err = gate
            .ensure_order_allowed(&order(0.01, Some(100.0)), &context())
            .unwrap_err();
        assert_eq!(err.status_code, 423);
        assert_eq!(err.code, "RISK_KILL_SWITCH_ACTIVE");
    }

    #[test]
    fn test_deployment_capital_gates() {
        let store = Arc::new(StateStore::new());
        set_limit(&store, "maxNotionalUsd", 30_000.0);
        set_limit(&store, "maxPositionNotionalUsd", 25_000.0);
        let gate = RiskPreTradeService::new(store);

        let request = CreateDeploymentRequest {
            strategy_id: "strat-001".to_string(),
            mode: DeploymentMode::Paper,
            capital: 40_000.0,
        };
        let err = gate.ensure_deployment_allowed(&request, &context()).unwrap_err();
        assert_eq!(err.code, "RISK_LIMIT_BREACH");

        // Seeded active deployment holds 20 000; 15 000 more breaches the
        // projected total even though it fits on its own.
        let request = CreateDeploymentRequest {
            strategy_id: "strat-001".to_string(),
            mode: DeploymentMode::Paper,
            capital: 15_000.0,
        };
        let err = gate.ensure_deployment_allowed(&request, &context()).unwrap_err();
        assert!(err.message.contains("Projected active deployment capital"));

        let request = CreateDeploymentRequest {
            strategy_id: "strat-001".to_string(),
            mode: DeploymentMode::Paper,
            capital: 5_000.0,
        };
        assert!(gate.ensure_deployment_allowed(&request, &context()).is_ok());
    }

    #[test]
    fn test_daily_loss_limit_blocks_orders() {
        let store = Arc::new(StateStore::new());
        {
            let mut portfolios = store.portfolios.write();
            let portfolio = portfolios.get_mut("portfolio-paper-001").unwrap();
            portfolio.pnl_total = -6_000.0;
        }
        set_limit(&store, "maxDailyLossUsd", 5_000.0);
        let gate = RiskPreTradeService::new(store);

        let err = gate
            .ensure_order_allowed(&order(0.001, Some(100.0)), &context())
            .unwrap_err();
        assert!(err.message.contains("Daily loss limit"));
    }

    #[test]
    fn test_invalid_policy_document_maps_to_500() {
        let store = Arc::new(StateStore::new());
        let mut doc = store.risk_policy_document();
        doc["limits"]["maxDrawdownPct"] = json!(500.0);
        store.set_risk_policy_document(doc);
        let gate = RiskPreTradeService::new(store);

        let err = gate
            .ensure_order_allowed(&order(0.01, Some(100.0)), &context())
            .unwrap_err();
        assert_eq!(err.status_code, 500);
        assert_eq!(err.code, "RISK_POLICY_INVALID");
    }
}
