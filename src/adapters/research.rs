//! Strategy/backtest research provider ("lona") adapter boundary.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::errors::AdapterError;

/// Outcome of a provider-run backtest, shaped to the domain.
#[derive(Debug, Clone)]
pub struct ProviderBacktestOutcome {
    pub provider_report_id: String,
    pub status: String,
    pub metrics: HashMap<String, f64>,
    pub error: Option<String>,
}

/// A strategy idea returned by a market scan.
#[derive(Debug, Clone)]
pub struct StrategyIdea {
    pub name: String,
    pub rationale: String,
    pub suitable_regime: String,
}

/// Market scan result from the research provider.
#[derive(Debug, Clone)]
pub struct MarketScanResult {
    pub regime_summary: String,
    pub strategy_ideas: Vec<StrategyIdea>,
}

/// Boundary to the strategy/backtest research provider.
#[async_trait]
pub trait ResearchAdapter: Send + Sync {
    /// Register a strategy with the provider and return its reference id.
    async fn create_strategy_ref(
        &self,
        name: &str,
        description: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<String, AdapterError>;

    /// Run a backtest against resolved provider data ids.
    async fn run_backtest(
        &self,
        provider_strategy_ref: &str,
        provider_data_ids: &[String],
        start_date: &str,
        end_date: &str,
        initial_cash: f64,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<ProviderBacktestOutcome, AdapterError>;

    async fn list_symbols(
        &self,
        limit: usize,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<(String, String)>, AdapterError>;

    async fn market_scan(
        &self,
        asset_classes: &[String],
        capital: f64,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<MarketScanResult, AdapterError>;
}

/// Deterministic baseline provider used when no remote research provider is
/// configured. Backtests complete immediately with fixed metrics.
#[derive(Default)]
pub struct InMemoryResearchAdapter {
    counter: Mutex<u64>,
}

impl InMemoryResearchAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self, prefix: &str) -> String {
        let mut counter = self.counter.lock();
        *counter += 1;
        format!("{}-{:04}", prefix, counter)
    }
}

#[async_trait]
impl ResearchAdapter for InMemoryResearchAdapter {
    async fn create_strategy_ref(
        &self,
        _name: &str,
        _description: &str,
        _tenant_id: &str,
        _user_id: &str,
    ) -> Result<String, AdapterError> {
        Ok(self.next("lona-strategy"))
    }

    async fn run_backtest(
        &self,
        _provider_strategy_ref: &str,
        provider_data_ids: &[String],
        _start_date: &str,
        _end_date: &str,
        initial_cash: f64,
        _tenant_id: &str,
        _user_id: &str,
    ) -> Result<ProviderBacktestOutcome, AdapterError> {
        if provider_data_ids.is_empty() {
            return Err(AdapterError::new(
                "Backtest requires at least one resolved data reference.",
                "LONA_BACKTEST_INVALID",
                502,
            ));
        }
        let mut metrics = HashMap::new();
        metrics.insert("sharpeRatio".to_string(), 1.42);
        metrics.insert("maxDrawdownPct".to_string(), 7.8);
        metrics.insert("finalEquity".to_string(), initial_cash * 1.12);
        Ok(ProviderBacktestOutcome {
            provider_report_id: self.next("lona-report"),
            status: "completed".to_string(),
            metrics,
            error: None,
        })
    }

    async fn list_symbols(
        &self,
        limit: usize,
        _tenant_id: &str,
        _user_id: &str,
    ) -> Result<Vec<(String, String)>, AdapterError> {
        let symbols = vec![
            ("lona-symbol-001".to_string(), "BTCUSDT".to_string()),
            ("lona-symbol-002".to_string(), "ETHUSDT".to_string()),
        ];
        Ok(symbols.into_iter().take(limit.max(1)).collect())
    }

    async fn market_scan(
        &self,
        asset_classes: &[String],
        _capital: f64,
        _tenant_id: &str,
        _user_id: &str,
    ) -> Result<MarketScanResult, AdapterError> {
        let focus = if asset_classes.is_empty() {
            "crypto".to_string()
        } else {
            asset_classes.join(", ")
        };
        Ok(MarketScanResult {
            regime_summary: format!("Sideways regime with medium volatility across {focus}."),
            strategy_ideas: vec![StrategyIdea {
                name: "Mean Reversion Baseline".to_string(),
                rationale: "Range-bound structure favors reversion entries with tight stops."
                    .to_string(),
                suitable_regime: "sideways".to_string(),
            }],
        })
    }
}
