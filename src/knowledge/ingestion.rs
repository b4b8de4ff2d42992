//! Knowledge Base ingestion pipeline with idempotent upserts.
//!
//! Lifecycle events are fingerprinted over their event scope; a fingerprint
//! already seen is silently suppressed, so repeated ingestion of the same
//! outcome produces at most one lesson.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::knowledge::models::{
    CorrelationEdgeRecord, KnowledgePatternRecord, LessonRecord, MacroEventRecord,
    MarketRegimeRecord, KB_SCHEMA_VERSION,
};
use crate::models::{utc_now, BacktestRecord, DeploymentRecord};
use crate::store::{scoped_fingerprint, StateStore};

/// Idempotent writes from runtime events into Knowledge Base records.
pub struct KnowledgeIngestionPipeline {
    store: Arc<StateStore>,
}

impl KnowledgeIngestionPipeline {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Seed a baseline pattern and regime on an empty knowledge base.
    pub fn seed_defaults(&self) {
        if !self.store.knowledge_patterns.read().is_empty() {
            return;
        }

        let pattern_id = self.store.next_id("kb-pattern");
        self.store.knowledge_patterns.write().insert(
            pattern_id.clone(),
            KnowledgePatternRecord::new(
                pattern_id,
                "Mean Reversion Baseline",
                "mean_reversion",
                "Reversion strategy for range-bound markets with volatility filters.",
                vec!["sideways".to_string(), "low_volatility".to_string()],
                vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
                vec!["1h".to_string(), "4h".to_string()],
                0.64,
                Some("seed"),
            ),
        );

        let regime_id = self.store.next_id("kb-regime");
        self.store.market_regimes.write().insert(
            regime_id.clone(),
            MarketRegimeRecord::new(
                regime_id,
                "BTCUSDT",
                "sideways",
                "medium",
                HashMap::from([("rsi".to_string(), 49.5), ("atr_pct".to_string(), 2.3)]),
                Some("Seed regime for retrieval baseline."),
            ),
        );
    }

    pub fn upsert_pattern(&self, mut pattern: KnowledgePatternRecord) {
        pattern.updated_at = utc_now();
        pattern.schema_version = KB_SCHEMA_VERSION.to_string();
        self.store
            .knowledge_patterns
            .write()
            .insert(pattern.id.clone(), pattern);
    }

    pub fn upsert_regime(&self, regime: MarketRegimeRecord) {
        self.store
            .market_regimes
            .write()
            .insert(regime.id.clone(), regime);
    }

    pub fn upsert_macro_event(&self, event: MacroEventRecord) {
        self.store
            .macro_events
            .write()
            .insert(event.id.clone(), event);
    }

    pub fn upsert_correlation(&self, edge: CorrelationEdgeRecord) {
        self.store
            .correlations
            .write()
            .insert(edge.id.clone(), edge);
    }

    /// Record a lesson for a finished backtest. Keyed by the outcome
    /// fingerprint; duplicates are no-ops.
    pub fn ingest_backtest_outcome(&self, strategy_id: Option<&str>, backtest: &BacktestRecord) {
        let fingerprint = scoped_fingerprint(
            "backtest_outcome",
            json!({
                "strategyId": strategy_id,
                "backtestId": backtest.id,
                "status": backtest.status,
                "metrics": backtest.metrics,
                "error": backtest.error,
            }),
        );
        if !self.mark_seen(fingerprint) {
            return;
        }

        let (lesson, category) = if backtest.status == "completed" {
            let sharpe = backtest.metrics.get("sharpeRatio").copied().unwrap_or(0.0);
            (
                format!("Backtest {} completed with Sharpe {:.2}.", backtest.id, sharpe),
                "backtest_completed",
            )
        } else if backtest.status == "failed" {
            (
                format!("Backtest {} ended with status failed.", backtest.id),
                "backtest_failure",
            )
        } else {
            (
                format!("Backtest {} ended with status {}.", backtest.id, backtest.status),
                "backtest_status",
            )
        };

        let lesson_id = self.store.next_id("kb-lesson");
        let mut metadata: HashMap<String, Value> = HashMap::new();
        metadata.insert("metrics".to_string(), json!(backtest.metrics));
        if let Some(error) = &backtest.error {
            metadata.insert("error".to_string(), json!(error));
        }
        self.store.lessons.write().insert(
            lesson_id.clone(),
            LessonRecord {
                id: lesson_id,
                lesson,
                category: category.to_string(),
                tags: vec![backtest.status.clone(), "backtest".to_string()],
                strategy_id: strategy_id.map(str::to_string),
                backtest_id: Some(backtest.id.clone()),
                deployment_id: None,
                metadata,
                schema_version: KB_SCHEMA_VERSION.to_string(),
                created_at: utc_now(),
            },
        );
    }

    /// Record a lesson for a deployment status/PnL change.
    pub fn ingest_deployment_outcome(&self, deployment: &DeploymentRecord) {
        let fingerprint = scoped_fingerprint(
            "deployment_outcome",
            json!({
                "deploymentId": deployment.id,
                "status": deployment.status,
                "latestPnl": deployment.latest_pnl,
            }),
        );
        if !self.mark_seen(fingerprint) {
            return;
        }

        let summary = match deployment.latest_pnl {
            Some(pnl) => format!(
                "Deployment {} status={} latestPnl={}",
                deployment.id, deployment.status, pnl
            ),
            None => format!("Deployment {} status={}", deployment.id, deployment.status),
        };

        let lesson_id = self.store.next_id("kb-lesson");
        self.store.lessons.write().insert(
            lesson_id.clone(),
            LessonRecord {
                id: lesson_id,
                lesson: summary,
                category: "deployment_state".to_string(),
                tags: vec!["deployment".to_string(), deployment.status.clone()],
                strategy_id: Some(deployment.strategy_id.clone()),
                backtest_id: None,
                deployment_id: Some(deployment.id.clone()),
                metadata: HashMap::new(),
                schema_version: KB_SCHEMA_VERSION.to_string(),
                created_at: utc_now(),
            },
        );
    }

    /// Returns true when the fingerprint was newly recorded.
    fn mark_seen(&self, fingerprint: String) -> bool {
        self.store.knowledge_ingestion_seen.lock().insert(fingerprint)
    }
}
