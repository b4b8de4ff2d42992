//! Application state container and per-request identity resolution.
//!
//! All services are wired once at startup and injected through axum state.
//! No process-wide mutable globals beyond the store the services share.

use axum::http::HeaderMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::adapters::bridge::InMemoryDataBridgeAdapter;
use crate::adapters::data::{InMemoryTraderDataAdapter, TraderDataAdapter, TraderDataHttpAdapter};
use crate::adapters::execution::{
    ExecutionAdapter, InMemoryExecutionAdapter, LiveEngineExecutionAdapter,
};
use crate::adapters::research::InMemoryResearchAdapter;
use crate::auth::IdentityResolver;
use crate::config::Config;
use crate::datasets::DatasetService;
use crate::errors::{PlatformApiError, PlatformResult};
use crate::execution::ExecutionService;
use crate::knowledge::{KnowledgeIngestionPipeline, KnowledgeQueryService};
use crate::models::RequestContext;
use crate::orchestrator::{OrchestratorQueueService, OrchestratorRetryService, RetryBudgetPolicy};
use crate::reconciliation::ReconciliationService;
use crate::risk::RiskAuditService;
use crate::store::StateStore;
use crate::strategies::StrategyBacktestService;
use crate::validation::ValidationService;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<StateStore>,
    pub identity: IdentityResolver,
    pub execution: Arc<ExecutionService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub strategies: Arc<StrategyBacktestService>,
    pub datasets: Arc<DatasetService>,
    pub orchestrator: Arc<OrchestratorQueueService>,
    pub retry: Arc<OrchestratorRetryService>,
    pub knowledge_query: Arc<KnowledgeQueryService>,
    pub validation: Arc<ValidationService>,
    pub audit: Arc<RiskAuditService>,
}

impl AppState {
    /// Wire the full service graph. HTTP adapters are engaged only when base
    /// URLs are configured; the in-memory baselines serve otherwise.
    pub fn new(config: Config) -> Self {
        let execution_adapter: Arc<dyn ExecutionAdapter> = match &config.live_engine_base_url {
            Some(base_url) => Arc::new(LiveEngineExecutionAdapter::new(
                base_url.clone(),
                config.service_api_key.clone(),
                config.live_engine_timeout_seconds,
            )),
            None => Arc::new(InMemoryExecutionAdapter::new()),
        };
        let trader_data: Arc<dyn TraderDataAdapter> = match &config.trader_data_base_url {
            Some(base_url) => Arc::new(TraderDataHttpAdapter::new(
                base_url.clone(),
                config.service_api_key.clone(),
                config.trader_data_timeout_seconds,
                config.market_context_cache_ttl_seconds,
            )),
            None => Arc::new(InMemoryTraderDataAdapter::new()),
        };
        Self::with_adapters(config, execution_adapter, trader_data)
    }

    pub fn with_adapters(
        config: Config,
        execution_adapter: Arc<dyn ExecutionAdapter>,
        trader_data: Arc<dyn TraderDataAdapter>,
    ) -> Self {
        let store = Arc::new(StateStore::new());
        KnowledgeIngestionPipeline::new(store.clone()).seed_defaults();

        let bridge = Arc::new(InMemoryDataBridgeAdapter::new(store.clone()));
        let research = Arc::new(InMemoryResearchAdapter::new());

        let reconciliation = Arc::new(ReconciliationService::new(
            store.clone(),
            execution_adapter.clone(),
        ));
        let execution = Arc::new(ExecutionService::new(
            store.clone(),
            execution_adapter,
            reconciliation.clone(),
            config.reconcile_min_interval_seconds,
        ));
        let strategies = Arc::new(StrategyBacktestService::new(
            store.clone(),
            research,
            bridge.clone(),
            trader_data,
        ));
        let datasets = Arc::new(DatasetService::new(store.clone(), bridge));
        let orchestrator = Arc::new(OrchestratorQueueService::new(store.clone()));
        let retry = Arc::new(OrchestratorRetryService::new(
            store.clone(),
            RetryBudgetPolicy::default(),
        ));
        let knowledge_query = Arc::new(KnowledgeQueryService::new(store.clone()));
        let validation = Arc::new(ValidationService::new(store.clone()));
        let audit = Arc::new(RiskAuditService::new(store.clone()));

        Self {
            identity: IdentityResolver::new(config.jwt_secret.clone()),
            config,
            store,
            execution,
            reconciliation,
            strategies,
            datasets,
            orchestrator,
            retry,
            knowledge_query,
            validation,
            audit,
        }
    }

    /// Resolve the caller's identity and build the request context. Every
    /// handler calls this first; failures render the canonical envelope.
    pub fn authenticate(&self, headers: &HeaderMap) -> PlatformResult<RequestContext> {
        let request_id = request_id_from(headers);
        let identity = self.identity.resolve(
            header(headers, "authorization").as_deref(),
            header(headers, "x-api-key").as_deref(),
            header(headers, "x-tenant-id").as_deref(),
            header(headers, "x-user-id").as_deref(),
            &request_id,
        )?;
        let mut context = RequestContext::new(request_id, identity.tenant_id, identity.user_id);
        context.user_email = identity.user_email;
        Ok(context)
    }
}

pub fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

pub fn request_id_from(headers: &HeaderMap) -> String {
    header(headers, "x-request-id")
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4()))
}

/// The Idempotency-Key header, or a per-request fallback that still makes the
/// create operation safe against provider-level duplication.
pub fn idempotency_key(headers: &HeaderMap, context: &RequestContext) -> String {
    header(headers, "idempotency-key")
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| format!("auto-{}", context.request_id))
}

pub fn bad_request(message: impl Into<String>, context: &RequestContext) -> PlatformApiError {
    PlatformApiError::new(400, "REQUEST_INVALID", message, &context.request_id)
}
