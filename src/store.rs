//! In-memory state store
//! Mission: Single owner of all entity records with tenant-scoped access
//!
//! Every map sits behind its own `parking_lot` lock so compound operations
//! (allocate id + insert, idempotency compare-and-set) stay atomic without
//! one process-wide lock. Locks are never held across an `.await`.

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

use crate::models::{
    utc_now, BacktestRecord, DatasetRecord, DeploymentMode, DeploymentRecord, DriftEventRecord,
    IdempotencyEntry, OrchestratorRunRecord, OrchestratorTraceRecord, OrderRecord,
    PortfolioRecord, PositionRecord, ResearchBudgetEvent, ResearchProviderBudget, RiskAuditRecord,
    StrategyRecord,
};
use crate::knowledge::models::{
    CorrelationEdgeRecord, KnowledgePatternRecord, LessonRecord, MacroEventRecord,
    MarketRegimeRecord,
};
use crate::risk::policy::default_risk_policy;
use crate::validation::store::{ValidationBaselineRecord, ValidationReplayRecord, ValidationRunRecord};

/// Typed in-memory repository for all platform entities.
pub struct StateStore {
    id_counters: Mutex<HashMap<String, u64>>,

    pub strategies: RwLock<HashMap<String, StrategyRecord>>,
    pub backtests: RwLock<HashMap<String, BacktestRecord>>,
    pub deployments: RwLock<HashMap<String, DeploymentRecord>>,
    pub orders: RwLock<HashMap<String, OrderRecord>>,
    pub portfolios: RwLock<HashMap<String, PortfolioRecord>>,
    pub datasets: RwLock<HashMap<String, DatasetRecord>>,
    pub dataset_provider_map: RwLock<HashMap<String, String>>,

    /// Risk policy document, mutated in place by the kill-switch service.
    pub risk_policy: RwLock<Value>,
    pub risk_audit_trail: RwLock<Vec<RiskAuditRecord>>,
    pub drift_events: RwLock<Vec<DriftEventRecord>>,

    pub orchestrator_runs: RwLock<HashMap<String, OrchestratorRunRecord>>,
    pub orchestrator_traces: RwLock<Vec<OrchestratorTraceRecord>>,

    pub knowledge_patterns: RwLock<HashMap<String, KnowledgePatternRecord>>,
    pub market_regimes: RwLock<HashMap<String, MarketRegimeRecord>>,
    pub lessons: RwLock<HashMap<String, LessonRecord>>,
    pub macro_events: RwLock<HashMap<String, MacroEventRecord>>,
    pub correlations: RwLock<HashMap<String, CorrelationEdgeRecord>>,
    pub knowledge_ingestion_seen: Mutex<HashSet<String>>,

    pub validation_runs: RwLock<HashMap<String, ValidationRunRecord>>,
    pub validation_baselines: RwLock<HashMap<String, ValidationBaselineRecord>>,
    pub validation_replays: RwLock<HashMap<String, ValidationReplayRecord>>,

    pub research_budget: RwLock<ResearchProviderBudget>,
    pub research_budget_events: RwLock<Vec<ResearchBudgetEvent>>,

    idempotency: Mutex<HashMap<(String, String), IdempotencyEntry>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let store = Self {
            id_counters: Mutex::new(HashMap::new()),
            strategies: RwLock::new(HashMap::new()),
            backtests: RwLock::new(HashMap::new()),
            deployments: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            portfolios: RwLock::new(HashMap::new()),
            datasets: RwLock::new(HashMap::new()),
            dataset_provider_map: RwLock::new(HashMap::new()),
            risk_policy: RwLock::new(default_risk_policy()),
            risk_audit_trail: RwLock::new(Vec::new()),
            drift_events: RwLock::new(Vec::new()),
            orchestrator_runs: RwLock::new(HashMap::new()),
            orchestrator_traces: RwLock::new(Vec::new()),
            knowledge_patterns: RwLock::new(HashMap::new()),
            market_regimes: RwLock::new(HashMap::new()),
            lessons: RwLock::new(HashMap::new()),
            macro_events: RwLock::new(HashMap::new()),
            correlations: RwLock::new(HashMap::new()),
            knowledge_ingestion_seen: Mutex::new(HashSet::new()),
            validation_runs: RwLock::new(HashMap::new()),
            validation_baselines: RwLock::new(HashMap::new()),
            validation_replays: RwLock::new(HashMap::new()),
            research_budget: RwLock::new(ResearchProviderBudget::default()),
            research_budget_events: RwLock::new(Vec::new()),
            idempotency: Mutex::new(HashMap::new()),
        };
        store.seed_baseline();
        store
    }

    /// Allocate the next monotonic id for a prefix, e.g. `dep-0003`.
    pub fn next_id(&self, prefix: &str) -> String {
        let mut counters = self.id_counters.lock();
        let counter = counters.entry(prefix.to_string()).or_insert(0);
        *counter += 1;
        format!("{}-{:04}", prefix, counter)
    }

    /// Stable SHA-256 fingerprint over canonical JSON (sorted keys).
    pub fn payload_fingerprint(&self, payload: &Value) -> String {
        payload_fingerprint(payload)
    }

    /// Idempotency lookup. Returns `(conflict, cached_response)`: a hit with
    /// a different payload fingerprint is a conflict; a hit with the same
    /// fingerprint replays the cached response verbatim.
    pub fn idempotent_lookup(
        &self,
        scope: &str,
        key: &str,
        payload: &Value,
    ) -> (bool, Option<Value>) {
        let fingerprint = payload_fingerprint(payload);
        let cache = self.idempotency.lock();
        match cache.get(&(scope.to_string(), key.to_string())) {
            Some(entry) if entry.fingerprint == fingerprint => (false, Some(entry.response.clone())),
            Some(_) => (true, None),
            None => (false, None),
        }
    }

    /// Record a command response for replay. First write wins; a concurrent
    /// duplicate with the same fingerprint keeps the original response.
    pub fn idempotent_save(&self, scope: &str, key: &str, payload: &Value, response: &Value) {
        let fingerprint = payload_fingerprint(payload);
        let mut cache = self.idempotency.lock();
        cache
            .entry((scope.to_string(), key.to_string()))
            .or_insert_with(|| IdempotencyEntry {
                fingerprint,
                response: response.clone(),
                created_at: utc_now(),
            });
    }

    pub fn risk_policy_document(&self) -> Value {
        self.risk_policy.read().clone()
    }

    pub fn set_risk_policy_document(&self, policy: Value) {
        *self.risk_policy.write() = policy;
    }

    /// Baseline records so drawdown, dataset, and scan flows are exercisable
    /// on a fresh process: one paper portfolio, one running deployment with a
    /// provider ref, and one published demo dataset.
    fn seed_baseline(&self) {
        let now = utc_now();
        let tenant = "tenant-local".to_string();
        let user = "user-local".to_string();

        self.deployments.write().insert(
            "dep-001".to_string(),
            DeploymentRecord {
                id: "dep-001".to_string(),
                strategy_id: "strat-001".to_string(),
                mode: DeploymentMode::Paper,
                status: "running".to_string(),
                capital: 20_000.0,
                provider_ref_id: Some("live-dep-001".to_string()),
                latest_pnl: None,
                created_at: now.clone(),
                updated_at: now.clone(),
                tenant_id: tenant.clone(),
                user_id: user.clone(),
            },
        );

        self.portfolios.write().insert(
            "portfolio-paper-001".to_string(),
            PortfolioRecord {
                id: "portfolio-paper-001".to_string(),
                mode: DeploymentMode::Paper,
                cash: 80_000.0,
                total_value: 100_000.0,
                pnl_total: 0.0,
                positions: vec![PositionRecord {
                    symbol: "BTCUSDT".to_string(),
                    quantity: 0.25,
                    current_price: 64_000.0,
                }],
                tenant_id: tenant.clone(),
                user_id: user.clone(),
            },
        );

        let dataset_id = "dataset-btc-1h-2025".to_string();
        self.datasets.write().insert(
            dataset_id.clone(),
            DatasetRecord {
                id: dataset_id.clone(),
                filename: "btc-1h-2025.csv".to_string(),
                size_bytes: 1_048_576,
                status: crate::models::DATASET_STATUS_PUBLISHED.to_string(),
                provider_data_id: Some(format!("lona-symbol-{dataset_id}")),
                created_at: now.clone(),
                updated_at: now,
                tenant_id: tenant,
                user_id: user,
            },
        );
        self.dataset_provider_map
            .write()
            .insert(dataset_id.clone(), format!("lona-symbol-{dataset_id}"));
    }
}

/// Canonical-JSON SHA-256 fingerprint. `serde_json` maps are ordered, so the
/// serialized form is already key-sorted and stable.
pub fn payload_fingerprint(payload: &Value) -> String {
    let canonical = serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string());
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// Fingerprint helper for ad-hoc scoped payloads.
pub fn scoped_fingerprint(scope: &str, fields: Value) -> String {
    let mut payload = json!({ "scope": scope });
    if let (Some(target), Some(extra)) = (payload.as_object_mut(), fields.as_object()) {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }
    payload_fingerprint(&payload)
}
