//! Strategy & backtest orchestration
//! Mission: Strategy CRUD, dataset-resolved backtests, budget-guarded scans

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::bridge::DataBridgeAdapter;
use crate::adapters::data::TraderDataAdapter;
use crate::adapters::research::{MarketScanResult, ResearchAdapter};
use crate::errors::{PlatformApiError, PlatformResult};
use crate::knowledge::ingestion::KnowledgeIngestionPipeline;
use crate::models::{
    utc_now, BacktestRecord, RequestContext, ResearchBudgetEvent, StrategyRecord,
};
use crate::store::StateStore;

/// Request to create a backtest, as received on the wire.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBacktestRequest {
    pub dataset_ids: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub initial_cash: f64,
}

/// Market scan response, including provider evidence gathered along the way.
#[derive(Debug, Clone)]
pub struct MarketScan {
    pub regime_summary: String,
    pub strategy_ideas: Vec<(String, String, String)>,
    pub data_context_summary: Option<String>,
}

/// Strategy and backtest flows against the research provider.
pub struct StrategyBacktestService {
    store: Arc<StateStore>,
    research: Arc<dyn ResearchAdapter>,
    bridge: Arc<dyn DataBridgeAdapter>,
    trader_data: Arc<dyn TraderDataAdapter>,
    knowledge: KnowledgeIngestionPipeline,
}

impl StrategyBacktestService {
    pub fn new(
        store: Arc<StateStore>,
        research: Arc<dyn ResearchAdapter>,
        bridge: Arc<dyn DataBridgeAdapter>,
        trader_data: Arc<dyn TraderDataAdapter>,
    ) -> Self {
        Self {
            knowledge: KnowledgeIngestionPipeline::new(store.clone()),
            store,
            research,
            bridge,
            trader_data,
        }
    }

    pub async fn create_strategy(
        &self,
        name: &str,
        description: &str,
        provider: &str,
        context: &RequestContext,
    ) -> PlatformResult<StrategyRecord> {
        let provider_ref = self
            .research
            .create_strategy_ref(name, description, &context.tenant_id, &context.user_id)
            .await
            .map_err(|err| PlatformApiError::from_adapter(err, &context.request_id))?;

        let now = utc_now();
        let strategy = StrategyRecord {
            id: self.store.next_id("strat"),
            name: name.to_string(),
            description: description.to_string(),
            provider: provider.to_string(),
            provider_ref_id: Some(provider_ref),
            created_at: now.clone(),
            updated_at: now,
            tenant_id: context.tenant_id.clone(),
            user_id: context.user_id.clone(),
        };
        self.store
            .strategies
            .write()
            .insert(strategy.id.clone(), strategy.clone());
        Ok(strategy)
    }

    pub fn get_strategy(
        &self,
        strategy_id: &str,
        context: &RequestContext,
    ) -> PlatformResult<StrategyRecord> {
        self.store
            .strategies
            .read()
            .get(strategy_id)
            .filter(|strategy| strategy.tenant_id == context.tenant_id)
            .cloned()
            .ok_or_else(|| {
                PlatformApiError::new(
                    404,
                    "STRATEGY_NOT_FOUND",
                    format!("Strategy {strategy_id} not found."),
                    &context.request_id,
                )
            })
    }

    pub fn list_strategies(&self, context: &RequestContext) -> Vec<StrategyRecord> {
        let mut strategies: Vec<StrategyRecord> = self
            .store
            .strategies
            .read()
            .values()
            .filter(|strategy| strategy.tenant_id == context.tenant_id)
            .cloned()
            .collect();
        strategies.sort_by(|a, b| a.id.cmp(&b.id));
        strategies
    }

    /// Create and run a backtest. Dataset references are resolved through the
    /// bridge first; unresolved references fail the request before any
    /// provider work happens. Outcomes feed the knowledge base best-effort.
    pub async fn create_backtest(
        &self,
        strategy_id: &str,
        request: &CreateBacktestRequest,
        context: &RequestContext,
    ) -> PlatformResult<BacktestRecord> {
        let strategy = self.get_strategy(strategy_id, context)?;

        let provider_data_ids = self
            .bridge
            .resolve_dataset_refs(&request.dataset_ids, &context.tenant_id, &context.user_id)
            .await
            .map_err(|err| PlatformApiError::from_adapter(err, &context.request_id))?;

        let provider_ref = strategy.provider_ref_id.clone().unwrap_or_default();
        let outcome = self
            .research
            .run_backtest(
                &provider_ref,
                &provider_data_ids,
                &request.start_date,
                &request.end_date,
                request.initial_cash,
                &context.tenant_id,
                &context.user_id,
            )
            .await
            .map_err(|err| PlatformApiError::from_adapter(err, &context.request_id))?;

        let now = utc_now();
        let backtest = BacktestRecord {
            id: self.store.next_id("bt"),
            strategy_id: strategy.id.clone(),
            dataset_ids: request.dataset_ids.clone(),
            start_date: request.start_date.clone(),
            end_date: request.end_date.clone(),
            initial_cash: request.initial_cash,
            status: outcome.status.clone(),
            metrics: outcome.metrics.clone(),
            provider_report_id: Some(outcome.provider_report_id.clone()),
            error: outcome.error.clone(),
            created_at: now.clone(),
            updated_at: now,
            tenant_id: context.tenant_id.clone(),
            user_id: context.user_id.clone(),
        };
        self.store
            .backtests
            .write()
            .insert(backtest.id.clone(), backtest.clone());

        self.knowledge
            .ingest_backtest_outcome(Some(&strategy.id), &backtest);
        Ok(backtest)
    }

    pub fn get_backtest(
        &self,
        backtest_id: &str,
        context: &RequestContext,
    ) -> PlatformResult<BacktestRecord> {
        self.store
            .backtests
            .read()
            .get(backtest_id)
            .filter(|backtest| backtest.tenant_id == context.tenant_id)
            .cloned()
            .ok_or_else(|| {
                PlatformApiError::new(
                    404,
                    "BACKTEST_NOT_FOUND",
                    format!("Backtest {backtest_id} not found."),
                    &context.request_id,
                )
            })
    }

    pub fn list_backtests(
        &self,
        strategy_id: &str,
        context: &RequestContext,
    ) -> PlatformResult<Vec<BacktestRecord>> {
        self.get_strategy(strategy_id, context)?;
        let mut backtests: Vec<BacktestRecord> = self
            .store
            .backtests
            .read()
            .values()
            .filter(|backtest| {
                backtest.strategy_id == strategy_id && backtest.tenant_id == context.tenant_id
            })
            .cloned()
            .collect();
        backtests.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(backtests)
    }

    /// Budget-guarded market scan against the research provider.
    pub async fn market_scan(
        &self,
        asset_classes: &[String],
        capital: f64,
        context: &RequestContext,
    ) -> PlatformResult<MarketScan> {
        self.reserve_research_budget(context)?;

        let scan: MarketScanResult = self
            .research
            .market_scan(asset_classes, capital, &context.tenant_id, &context.user_id)
            .await
            .map_err(|err| PlatformApiError::from_adapter(err, &context.request_id))?;

        // Context enrichment is best-effort; a provider failure downgrades
        // the response rather than failing the scan.
        let data_context_summary = match self
            .trader_data
            .get_market_context(asset_classes, &context.tenant_id, &context.user_id)
            .await
        {
            Ok(payload) => payload
                .get("regimeSummary")
                .and_then(Value::as_str)
                .map(str::to_string),
            Err(err) => {
                tracing::warn!(
                    code = %err.code,
                    request_id = %context.request_id,
                    "Market context unavailable for scan"
                );
                None
            }
        };

        Ok(MarketScan {
            regime_summary: scan.regime_summary,
            strategy_ideas: scan
                .strategy_ideas
                .into_iter()
                .map(|idea| (idea.name, idea.rationale, idea.suitable_regime))
                .collect(),
            data_context_summary,
        })
    }

    /// Reserve the estimated scan cost against the provider budget, or fail
    /// with 429 when either the per-request or total budget is exceeded.
    fn reserve_research_budget(&self, context: &RequestContext) -> PlatformResult<()> {
        let mut budget = self.store.research_budget.write();
        let cost = budget.estimated_market_scan_cost_usd;

        let rejection = if cost > budget.max_per_request_cost_usd {
            Some("per_request_budget_exceeded")
        } else if budget.spent_cost_usd + cost > budget.max_total_cost_usd {
            Some("total_budget_exceeded")
        } else {
            None
        };

        if let Some(reason) = rejection {
            let event = ResearchBudgetEvent {
                decision: "rejected".to_string(),
                reason: reason.to_string(),
                estimated_cost_usd: cost,
                spent_after_usd: budget.spent_cost_usd,
                request_id: context.request_id.clone(),
                tenant_id: context.tenant_id.clone(),
                user_id: context.user_id.clone(),
                created_at: utc_now(),
            };
            drop(budget);
            self.store.research_budget_events.write().push(event);
            return Err(PlatformApiError::new(
                429,
                "RESEARCH_PROVIDER_BUDGET_EXCEEDED",
                format!("Research provider budget exceeded ({reason})."),
                &context.request_id,
            ));
        }

        budget.spent_cost_usd += cost;
        let event = ResearchBudgetEvent {
            decision: "reserved".to_string(),
            reason: "within_budget".to_string(),
            estimated_cost_usd: cost,
            spent_after_usd: budget.spent_cost_usd,
            request_id: context.request_id.clone(),
            tenant_id: context.tenant_id.clone(),
            user_id: context.user_id.clone(),
            created_at: utc_now(),
        };
        drop(budget);
        self.store.research_budget_events.write().push(event);
        Ok(())
    }
}
