//! Tenant-scoped validation run, baseline, and replay persistence.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::PlatformApiError;
use crate::models::{utc_now, RequestContext};
use crate::store::StateStore;
use crate::validation::replay::{
    evaluate_replay_policy, ReplayGateInputs, ReplayGateOutcome, ValidationDecision,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationActor {
    User,
    Bot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRunRecord {
    pub id: String,
    pub actor: ValidationActor,
    pub profile: String,
    pub decision: ValidationDecision,
    pub metric_drift_pct: f64,
    pub artifact_ref: String,
    pub request_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationBaselineRecord {
    pub id: String,
    pub run_id: String,
    pub decision: ValidationDecision,
    pub metric_drift_pct: f64,
    pub tenant_id: String,
    pub user_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReplayRecord {
    pub id: String,
    pub baseline_id: String,
    pub candidate_run_id: String,
    pub outcome: ReplayGateOutcome,
    pub tenant_id: String,
    pub user_id: String,
    pub created_at: String,
}

/// Blocking flags controlling the merge/release gates of a replay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayBlockingFlags {
    pub block_merge_on_fail: bool,
    pub block_release_on_fail: bool,
    pub block_merge_on_agent_fail: bool,
    pub block_release_on_agent_fail: bool,
}

/// Validation runs, baselines, and replays with row-level tenant scoping:
/// a read by another tenant behaves as if the record did not exist.
pub struct ValidationService {
    store: Arc<StateStore>,
}

impl ValidationService {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    pub fn create_run(
        &self,
        actor: ValidationActor,
        profile: &str,
        decision: ValidationDecision,
        metric_drift_pct: f64,
        artifact_ref: &str,
        context: &RequestContext,
    ) -> ValidationRunRecord {
        let record = ValidationRunRecord {
            id: self.store.next_id("val-run"),
            actor,
            profile: profile.to_string(),
            decision,
            metric_drift_pct,
            artifact_ref: artifact_ref.to_string(),
            request_id: context.request_id.clone(),
            tenant_id: context.tenant_id.clone(),
            user_id: context.user_id.clone(),
            created_at: utc_now(),
        };
        self.store
            .validation_runs
            .write()
            .insert(record.id.clone(), record.clone());
        record
    }

    pub fn get_run(
        &self,
        run_id: &str,
        context: &RequestContext,
    ) -> Result<ValidationRunRecord, PlatformApiError> {
        self.store
            .validation_runs
            .read()
            .get(run_id)
            .filter(|run| run.tenant_id == context.tenant_id)
            .cloned()
            .ok_or_else(|| not_found("VALIDATION_RUN_NOT_FOUND", run_id, context))
    }

    /// Promote a run to the tenant's baseline for its profile.
    pub fn promote_baseline(
        &self,
        run_id: &str,
        context: &RequestContext,
    ) -> Result<ValidationBaselineRecord, PlatformApiError> {
        let run = self.get_run(run_id, context)?;
        let baseline = ValidationBaselineRecord {
            id: self.store.next_id("val-baseline"),
            run_id: run.id.clone(),
            decision: run.decision,
            metric_drift_pct: run.metric_drift_pct,
            tenant_id: context.tenant_id.clone(),
            user_id: context.user_id.clone(),
            created_at: utc_now(),
        };
        self.store
            .validation_baselines
            .write()
            .insert(baseline.id.clone(), baseline.clone());
        Ok(baseline)
    }

    pub fn get_baseline(
        &self,
        baseline_id: &str,
        context: &RequestContext,
    ) -> Result<ValidationBaselineRecord, PlatformApiError> {
        self.store
            .validation_baselines
            .read()
            .get(baseline_id)
            .filter(|baseline| baseline.tenant_id == context.tenant_id)
            .cloned()
            .ok_or_else(|| not_found("VALIDATION_BASELINE_NOT_FOUND", baseline_id, context))
    }

    /// Run the replay gate: compare a candidate run against a stored baseline
    /// and persist the outcome.
    pub fn replay(
        &self,
        baseline_id: &str,
        candidate_run_id: &str,
        metric_drift_threshold_pct: f64,
        flags: ReplayBlockingFlags,
        context: &RequestContext,
    ) -> Result<ValidationReplayRecord, PlatformApiError> {
        let baseline = self.get_baseline(baseline_id, context)?;
        let candidate = self.get_run(candidate_run_id, context)?;

        let outcome = evaluate_replay_policy(&ReplayGateInputs {
            baseline_decision: baseline.decision,
            candidate_decision: candidate.decision,
            baseline_metric_drift_pct: baseline.metric_drift_pct,
            candidate_metric_drift_pct: candidate.metric_drift_pct,
            metric_drift_threshold_pct,
            block_merge_on_fail: flags.block_merge_on_fail,
            block_release_on_fail: flags.block_release_on_fail,
            block_merge_on_agent_fail: flags.block_merge_on_agent_fail,
            block_release_on_agent_fail: flags.block_release_on_agent_fail,
        })
        .map_err(|err| {
            PlatformApiError::new(
                400,
                "VALIDATION_REPLAY_INVALID",
                err.to_string(),
                &context.request_id,
            )
        })?;

        let record = ValidationReplayRecord {
            id: self.store.next_id("val-replay"),
            baseline_id: baseline.id.clone(),
            candidate_run_id: candidate.id.clone(),
            outcome,
            tenant_id: context.tenant_id.clone(),
            user_id: context.user_id.clone(),
            created_at: utc_now(),
        };
        self.store
            .validation_replays
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }
}

fn not_found(code: &str, id: &str, context: &RequestContext) -> PlatformApiError {
    PlatformApiError::new(
        404,
        code,
        format!("Validation record {id} not found."),
        &context.request_id,
    )
}

/// Parse a decision string from the wire.
pub fn parse_decision(raw: &str) -> Option<ValidationDecision> {
    match raw {
        "pass" => Some(ValidationDecision::Pass),
        "conditional_pass" => Some(ValidationDecision::ConditionalPass),
        "fail" => Some(ValidationDecision::Fail),
        _ => None,
    }
}
