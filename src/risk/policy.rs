//! Risk policy schema (`risk-policy.v1`) loading and strict validation.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

pub const SUPPORTED_RISK_POLICY_VERSION: &str = "risk-policy.v1";

/// Raised when a risk policy document violates the contract.
#[derive(Debug, Clone, Error)]
#[error("Invalid risk policy payload: {0}")]
pub struct RiskPolicyValidationError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskPolicyMode {
    Advisory,
    Enforced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskActionOnBreach {
    RejectOrder,
    CancelOpenOrders,
    HaltDeployments,
    NotifyOps,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskPolicyLimits {
    #[serde(rename = "maxNotionalUsd")]
    pub max_notional_usd: f64,
    #[serde(rename = "maxPositionNotionalUsd")]
    pub max_position_notional_usd: f64,
    #[serde(rename = "maxDrawdownPct")]
    pub max_drawdown_pct: f64,
    #[serde(rename = "maxDailyLossUsd")]
    pub max_daily_loss_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskPolicyKillSwitch {
    pub enabled: bool,
    #[serde(default)]
    pub triggered: bool,
    #[serde(rename = "triggeredAt", default, skip_serializing_if = "Option::is_none")]
    pub triggered_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskPolicy {
    pub version: String,
    pub mode: RiskPolicyMode,
    pub limits: RiskPolicyLimits,
    #[serde(rename = "killSwitch")]
    pub kill_switch: RiskPolicyKillSwitch,
    #[serde(rename = "actionsOnBreach")]
    pub actions_on_breach: Vec<RiskActionOnBreach>,
}

/// Validate a policy document against the `risk-policy.v1` contract.
/// Unknown fields, wrong types, and semantic violations all reject.
pub fn validate_risk_policy(document: &Value) -> Result<RiskPolicy, RiskPolicyValidationError> {
    let policy: RiskPolicy = serde_json::from_value(document.clone())
        .map_err(|err| RiskPolicyValidationError(err.to_string()))?;

    if policy.version != SUPPORTED_RISK_POLICY_VERSION {
        return Err(RiskPolicyValidationError(format!(
            "Unsupported risk policy version: {}. Expected {}.",
            policy.version, SUPPORTED_RISK_POLICY_VERSION
        )));
    }

    let limits = &policy.limits;
    for (name, value) in [
        ("maxNotionalUsd", limits.max_notional_usd),
        ("maxPositionNotionalUsd", limits.max_position_notional_usd),
        ("maxDrawdownPct", limits.max_drawdown_pct),
        ("maxDailyLossUsd", limits.max_daily_loss_usd),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(RiskPolicyValidationError(format!(
                "{name} must be a non-negative finite number."
            )));
        }
    }
    if limits.max_drawdown_pct > 100.0 {
        return Err(RiskPolicyValidationError(
            "maxDrawdownPct must be within [0, 100].".to_string(),
        ));
    }
    if limits.max_position_notional_usd > limits.max_notional_usd {
        return Err(RiskPolicyValidationError(
            "maxPositionNotionalUsd must be less than or equal to maxNotionalUsd.".to_string(),
        ));
    }

    if policy.actions_on_breach.is_empty() {
        return Err(RiskPolicyValidationError(
            "actionsOnBreach must not be empty.".to_string(),
        ));
    }
    let unique: std::collections::HashSet<_> = policy.actions_on_breach.iter().collect();
    if unique.len() != policy.actions_on_breach.len() {
        return Err(RiskPolicyValidationError(
            "actionsOnBreach must not contain duplicates.".to_string(),
        ));
    }

    if let Some(triggered_at) = &policy.kill_switch.triggered_at {
        DateTime::parse_from_rfc3339(triggered_at).map_err(|_| {
            RiskPolicyValidationError("triggeredAt must be an RFC3339 date-time string.".to_string())
        })?;
    }
    if let Some(reason) = &policy.kill_switch.reason {
        if reason.trim().is_empty() {
            return Err(RiskPolicyValidationError(
                "killSwitch.reason must not be empty when present.".to_string(),
            ));
        }
    }

    Ok(policy)
}

/// Default enforced policy loaded at startup.
pub fn default_risk_policy() -> Value {
    json!({
        "version": SUPPORTED_RISK_POLICY_VERSION,
        "mode": "enforced",
        "limits": {
            "maxNotionalUsd": 100_000.0,
            "maxPositionNotionalUsd": 25_000.0,
            "maxDrawdownPct": 20.0,
            "maxDailyLossUsd": 5_000.0,
        },
        "killSwitch": {
            "enabled": true,
            "triggered": false,
        },
        "actionsOnBreach": ["reject_order", "halt_deployments", "notify_ops"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_validates() {
        let policy = validate_risk_policy(&default_risk_policy()).unwrap();
        assert_eq!(policy.version, SUPPORTED_RISK_POLICY_VERSION);
        assert_eq!(policy.mode, RiskPolicyMode::Enforced);
        assert!(policy.kill_switch.enabled);
        assert!(!policy.kill_switch.triggered);
    }

    #[test]
    fn test_extra_fields_rejected() {
        let mut doc = default_risk_policy();
        doc["surprise"] = json!(true);
        assert!(validate_risk_policy(&doc).is_err());
    }

    #[test]
    fn test_type_coercion_rejected() {
        let mut doc = default_risk_policy();
        doc["limits"]["maxNotionalUsd"] = json!("100000");
        assert!(validate_risk_policy(&doc).is_err());
    }

    #[test]
    fn test_position_limit_must_not_exceed_total_limit() {
        let mut doc = default_risk_policy();
        doc["limits"]["maxPositionNotionalUsd"] = json!(200_000.0);
        let err = validate_risk_policy(&doc).unwrap_err();
        assert!(err.0.contains("maxPositionNotionalUsd"));
    }

    #[test]
    fn test_drawdown_range_enforced() {
        let mut doc = default_risk_policy();
        doc["limits"]["maxDrawdownPct"] = json!(120.0);
        assert!(validate_risk_policy(&doc).is_err());
        doc["limits"]["maxDrawdownPct"] = json!(-1.0);
        assert!(validate_risk_policy(&doc).is_err());
    }

    #[test]
    fn test_actions_must_be_known_unique_and_non_empty() {
        let mut doc = default_risk_policy();
        doc["actionsOnBreach"] = json!([]);
        assert!(validate_risk_policy(&doc).is_err());

        doc["actionsOnBreach"] = json!(["reject_order", "reject_order"]);
        assert!(validate_risk_policy(&doc).is_err());

        doc["actionsOnBreach"] = json!(["self_destruct"]);
        assert!(validate_risk_policy(&doc).is_err());
    }

    #[test]
    fn test_triggered_at_must_be_rfc3339() {
        let mut doc = default_risk_policy();
        doc["killSwitch"]["triggeredAt"] = json!("yesterday");
        assert!(validate_risk_policy(&doc).is_err());

        doc["killSwitch"]["triggeredAt"] = json!("2026-02-14T10:00:00Z");
        assert!(validate_risk_policy(&doc).is_ok());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut doc = default_risk_policy();
        doc["version"] = json!("risk-policy.v2");
        assert!(validate_risk_policy(&doc).is_err());
    }
}
