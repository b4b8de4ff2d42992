//! Replay comparison and policy gate evaluation for validation regression
//! checks.
//!
//! The threshold check is strict: a drift delta equal to the threshold does
//! not breach; only a strictly greater delta does. Improvements relative to
//! baseline never breach (delta floors at zero).

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationDecision {
    Fail,
    ConditionalPass,
    Pass,
}

impl ValidationDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationDecision::Fail => "fail",
            ValidationDecision::ConditionalPass => "conditional_pass",
            ValidationDecision::Pass => "pass",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ValidationDecision::Fail => 0,
            ValidationDecision::ConditionalPass => 1,
            ValidationDecision::Pass => 2,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{field} must be a finite value >= 0.")]
pub struct ReplayInputError {
    pub field: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayGateInputs {
    pub baseline_decision: ValidationDecision,
    pub candidate_decision: ValidationDecision,
    pub baseline_metric_drift_pct: f64,
    pub candidate_metric_drift_pct: f64,
    pub metric_drift_threshold_pct: f64,
    pub block_merge_on_fail: bool,
    pub block_release_on_fail: bool,
    pub block_merge_on_agent_fail: bool,
    pub block_release_on_agent_fail: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayGateOutcome {
    pub decision: ValidationDecision,
    pub merge_blocked: bool,
    pub release_blocked: bool,
    pub merge_gate_status: String,
    pub release_gate_status: String,
    pub baseline_decision: ValidationDecision,
    pub candidate_decision: ValidationDecision,
    pub metric_drift_delta_pct: f64,
    pub metric_drift_threshold_pct: f64,
    pub threshold_breached: bool,
    pub reasons: Vec<String>,
}

fn non_negative_finite(value: f64, field: &'static str) -> Result<f64, ReplayInputError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ReplayInputError { field });
    }
    Ok(value)
}

/// Evaluate the replay policy against a baseline/candidate decision pair.
pub fn evaluate_replay_policy(
    inputs: &ReplayGateInputs,
) -> Result<ReplayGateOutcome, ReplayInputError> {
    let baseline_drift =
        non_negative_finite(inputs.baseline_metric_drift_pct, "baselineMetricDriftPct")?;
    let candidate_drift =
        non_negative_finite(inputs.candidate_metric_drift_pct, "candidateMetricDriftPct")?;
    let threshold =
        non_negative_finite(inputs.metric_drift_threshold_pct, "metricDriftThresholdPct")?;

    let mut decision = inputs.candidate_decision;
    let mut reasons = Vec::new();

    if inputs.candidate_decision.rank() < inputs.baseline_decision.rank() {
        decision = ValidationDecision::Fail;
        reasons.push("candidate_decision_regressed_from_baseline".to_string());
    }

    let delta = (candidate_drift - baseline_drift).max(0.0);
    let threshold_breached = delta > threshold;
    if threshold_breached {
        decision = ValidationDecision::Fail;
        reasons.push("metric_drift_threshold_exceeded".to_string());
    }

    let (merge_blocked, release_blocked) = match decision {
        ValidationDecision::Fail => (inputs.block_merge_on_fail, inputs.block_release_on_fail),
        ValidationDecision::ConditionalPass => (
            inputs.block_merge_on_agent_fail,
            inputs.block_release_on_agent_fail,
        ),
        ValidationDecision::Pass => (false, false),
    };

    Ok(ReplayGateOutcome {
        decision,
        merge_blocked,
        release_blocked,
        merge_gate_status: gate_status(merge_blocked),
        release_gate_status: gate_status(release_blocked),
        baseline_decision: inputs.baseline_decision,
        candidate_decision: inputs.candidate_decision,
        metric_drift_delta_pct: delta,
        metric_drift_threshold_pct: threshold,
        threshold_breached,
        reasons,
    })
}

fn gate_status(blocked: bool) -> String {
    if blocked { "blocked" } else { "pass" }.to_string()
}
