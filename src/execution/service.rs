//! Deployment and order domain flows.
//!
//! Reads are tenant-scoped: a record owned by another tenant behaves as if
//! it did not exist. Side effects route through the command service only.
//! Deployment reads refresh provider state, evaluate the drawdown
//! kill-switch, and issue a stop against the offending deployment when the
//! switch engages.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::adapters::execution::{
    portfolio_record_from_provider, ExecutionAdapter, ProviderDeploymentState,
};
use crate::errors::{PlatformApiError, PlatformResult};
use crate::execution::commands::{
    CancelOrderCommand, CreateDeploymentCommand, ExecutionCommandService, PlaceOrderCommand,
    StopDeploymentCommand,
};
use crate::knowledge::ingestion::KnowledgeIngestionPipeline;
use crate::lifecycle::{apply_deployment_transition, apply_order_transition};
use crate::models::{
    utc_now, CreateDeploymentRequest, CreateOrderRequest, DeploymentRecord, DriftEventRecord,
    OrderRecord, PortfolioRecord, RequestContext,
};
use crate::reconciliation::ReconciliationService;
use crate::risk::{RiskAuditService, RiskKillSwitchService, RiskPreTradeService};
use crate::store::StateStore;

const ACTIVE_DEPLOYMENT_STATES: &[&str] = &["queued", "running", "paused"];

/// Domain service for deployments, orders, and portfolios.
pub struct ExecutionService {
    store: Arc<StateStore>,
    adapter: Arc<dyn ExecutionAdapter>,
    commands: ExecutionCommandService,
    pretrade: RiskPreTradeService,
    killswitch: RiskKillSwitchService,
    audit: RiskAuditService,
    reconciliation: Arc<ReconciliationService>,
    knowledge: KnowledgeIngestionPipeline,
    reconcile_min_interval: Duration,
    last_reconcile: Mutex<HashMap<(String, String), Instant>>,
}

impl ExecutionService {
    pub fn new(
        store: Arc<StateStore>,
        adapter: Arc<dyn ExecutionAdapter>,
        reconciliation: Arc<ReconciliationService>,
        reconcile_min_interval_seconds: f64,
    ) -> Self {
        Self {
            commands: ExecutionCommandService::new(adapter.clone(), store.clone()),
            pretrade: RiskPreTradeService::new(store.clone()),
            killswitch: RiskKillSwitchService::new(store.clone()),
            audit: RiskAuditService::new(store.clone()),
            knowledge: KnowledgeIngestionPipeline::new(store.clone()),
            reconciliation,
            adapter,
            store,
            reconcile_min_interval: Duration::from_secs_f64(
                reconcile_min_interval_seconds.max(0.0),
            ),
            last_reconcile: Mutex::new(HashMap::new()),
        }
    }

    pub async fn create_deployment(
        &self,
        request: &CreateDeploymentRequest,
        idempotency_key: &str,
        context: &RequestContext,
    ) -> PlatformResult<DeploymentRecord> {
        self.gated(
            self.pretrade.ensure_deployment_allowed(request, context),
            "pre_trade_deployment",
            "deployment",
            context,
        )?;

        let command = CreateDeploymentCommand {
            strategy_id: request.strategy_id.clone(),
            mode: request.mode.as_str().to_string(),
            capital: request.capital,
            tenant_id: context.tenant_id.clone(),
            user_id: context.user_id.clone(),
            idempotency_key: idempotency_key.to_string(),
            request_id: context.request_id.clone(),
        };
        let response = self.commands.create_deployment(&command).await?;
        Ok(self.upsert_deployment_from_provider(request, &response, context))
    }

    pub async fn get_deployment(
        &self,
        deployment_id: &str,
        context: &RequestContext,
    ) -> PlatformResult<DeploymentRecord> {
        let record = self.deployment_scoped(deployment_id, context)?;

        let Some(provider_ref) = record.provider_ref_id.clone() else {
            return Ok(record);
        };
        let provider = self
            .adapter
            .get_deployment(&provider_ref, &context.tenant_id, &context.user_id)
            .await
            .map_err(|err| PlatformApiError::from_adapter(err, &context.request_id))?;

        let record = self.apply_provider_state(deployment_id, &provider);

        let breached = self.killswitch.evaluate_drawdown_breach(
            deployment_id,
            record.capital,
            record.latest_pnl,
            context,
        )?;
        if breached && ACTIVE_DEPLOYMENT_STATES.contains(&record.status.as_str()) {
            self.audit.record_decision(
                "block",
                "drawdown_killswitch",
                "deployment",
                Some(deployment_id),
                context,
                Some("risk-policy.v1"),
                None,
                Some("RISK_KILL_SWITCH_ACTIVE"),
                self.killswitch.kill_switch_reason().as_deref(),
                HashMap::new(),
            );
            let stop = self
                .commands
                .stop_deployment(&StopDeploymentCommand {
                    provider_deployment_id: provider_ref,
                    reason: self.killswitch.kill_switch_reason(),
                    tenant_id: context.tenant_id.clone(),
                    user_id: context.user_id.clone(),
                    request_id: context.request_id.clone(),
                })
                .await?;
            return Ok(self.apply_provider_state(deployment_id, &stop));
        }
        Ok(record)
    }

    pub async fn stop_deployment(
        &self,
        deployment_id: &str,
        reason: Option<&str>,
        context: &RequestContext,
    ) -> PlatformResult<DeploymentRecord> {
        let record = self.deployment_scoped(deployment_id, context)?;
        let provider_ref = record.provider_ref_id.clone().ok_or_else(|| {
            PlatformApiError::new(
                409,
                "DEPLOYMENT_NOT_DELEGATED",
                format!("Deployment {deployment_id} has no provider reference to stop."),
                &context.request_id,
            )
        })?;

        let stop = self
            .commands
            .stop_deployment(&StopDeploymentCommand {
                provider_deployment_id: provider_ref,
                reason: reason.map(str::to_string),
                tenant_id: context.tenant_id.clone(),
                user_id: context.user_id.clone(),
                request_id: context.request_id.clone(),
            })
            .await?;
        Ok(self.apply_provider_state(deployment_id, &stop))
    }

    pub async fn list_deployments(
        &self,
        context: &RequestContext,
    ) -> PlatformResult<Vec<DeploymentRecord>> {
        if self.should_reconcile(&context.tenant_id, "deployments") {
            self.reconciliation
                .reconcile_deployments(
                    &context.tenant_id,
                    &context.user_id,
                    Some(&context.request_id),
                )
                .await?;
        }
        let mut records: Vec<DeploymentRecord> = self
            .store
            .deployments
            .read()
            .values()
            .filter(|deployment| deployment.tenant_id == context.tenant_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    pub async fn create_order(
        &self,
        request: &CreateOrderRequest,
        idempotency_key: &str,
        context: &RequestContext,
    ) -> PlatformResult<OrderRecord> {
        self.gated(
            self.pretrade.ensure_order_allowed(request, context),
            "pre_trade_order",
            "order",
            context,
        )?;

        let command = PlaceOrderCommand {
            symbol: request.symbol.clone(),
            side: request.side.clone(),
            order_type: request.order_type.clone(),
            quantity: request.quantity,
            price: request.price,
            deployment_id: request.deployment_id.clone(),
            tenant_id: context.tenant_id.clone(),
            user_id: context.user_id.clone(),
            idempotency_key: idempotency_key.to_string(),
            request_id: context.request_id.clone(),
        };
        let response = self.commands.place_order(&command).await?;

        // Replays resolve to the already-created record via the provider id.
        let existing = self
            .store
            .orders
            .read()
            .values()
            .find(|order| {
                order.provider_order_id.as_deref() == Some(response.provider_order_id.as_str())
                    && order.tenant_id == context.tenant_id
            })
            .cloned();
        if let Some(order) = existing {
            return Ok(order);
        }

        let now = utc_now();
        let order = OrderRecord {
            id: self.store.next_id("ord"),
            symbol: request.symbol.clone(),
            side: request.side.clone(),
            order_type: request.order_type.clone(),
            quantity: request.quantity,
            price: request.price,
            status: apply_order_transition("pending", Some(&response.status)),
            deployment_id: request.deployment_id.clone(),
            provider_order_id: Some(response.provider_order_id.clone()),
            created_at: now.clone(),
            updated_at: now,
            tenant_id: context.tenant_id.clone(),
            user_id: context.user_id.clone(),
        };
        self.store
            .orders
            .write()
            .insert(order.id.clone(), order.clone());
        Ok(order)
    }

    pub fn get_order(
        &self,
        order_id: &str,
        context: &RequestContext,
    ) -> PlatformResult<OrderRecord> {
        self.order_scoped(order_id, context)
    }

    pub async fn list_orders(&self, context: &RequestContext) -> PlatformResult<Vec<OrderRecord>> {
        if self.should_reconcile(&context.tenant_id, "orders") {
            self.reconciliation
                .reconcile_orders(&context.tenant_id, &context.user_id, Some(&context.request_id))
                .await?;
        }
        let mut records: Vec<OrderRecord> = self
            .store
            .orders
            .read()
            .values()
            .filter(|order| order.tenant_id == context.tenant_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    pub async fn cancel_order(
        &self,
        order_id: &str,
        context: &RequestContext,
    ) -> PlatformResult<OrderRecord> {
        let record = self.order_scoped(order_id, context)?;
        let provider_order_id = record.provider_order_id.clone().ok_or_else(|| {
            PlatformApiError::new(
                409,
                "ORDER_NOT_DELEGATED",
                format!("Order {order_id} has no provider reference to cancel."),
                &context.request_id,
            )
        })?;

        let response = self
            .commands
            .cancel_order(&CancelOrderCommand {
                provider_order_id,
                tenant_id: context.tenant_id.clone(),
                user_id: context.user_id.clone(),
                request_id: context.request_id.clone(),
            })
            .await?;

        let mut orders = self.store.orders.write();
        let order = orders.get_mut(order_id).ok_or_else(|| {
            PlatformApiError::new(
                404,
                "ORDER_NOT_FOUND",
                format!("Order {order_id} not found."),
                &context.request_id,
            )
        })?;
        order.status = apply_order_transition(&order.status, Some(&response.status));
        order.updated_at = utc_now();
        Ok(order.clone())
    }

    pub async fn get_portfolio(
        &self,
        mode: &str,
        context: &RequestContext,
    ) -> PlatformResult<PortfolioRecord> {
        let provider = self
            .adapter
            .get_portfolio(mode, &context.tenant_id, &context.user_id)
            .await
            .map_err(|err| PlatformApiError::from_adapter(err, &context.request_id))?;
        let Some(provider) = provider else {
            return Err(PlatformApiError::new(
                404,
                "PORTFOLIO_NOT_FOUND",
                format!("Portfolio for mode {mode} not found."),
                &context.request_id,
            ));
        };
        let record =
            portfolio_record_from_provider(provider, &context.tenant_id, &context.user_id);
        self.store
            .portfolios
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    pub fn list_drift_events(&self, context: &RequestContext) -> Vec<DriftEventRecord> {
        self.store
            .drift_events
            .read()
            .iter()
            .filter(|event| {
                event.metadata.get("tenantId").and_then(|v| v.as_str())
                    == Some(context.tenant_id.as_str())
            })
            .cloned()
            .collect()
    }

    /// At most one reconciliation pass per `(tenant, resource)` scope per
    /// minimum interval.
    fn should_reconcile(&self, tenant_id: &str, resource: &str) -> bool {
        let mut last = self.last_reconcile.lock();
        let key = (tenant_id.to_string(), resource.to_string());
        let now = Instant::now();
        match last.get(&key) {
            Some(at) if now.duration_since(*at) < self.reconcile_min_interval => false,
            _ => {
                last.insert(key, now);
                true
            }
        }
    }

    fn gated(
        &self,
        outcome: Result<crate::risk::RiskPolicy, PlatformApiError>,
        check_type: &str,
        resource_type: &str,
        context: &RequestContext,
    ) -> PlatformResult<()> {
        match outcome {
            Ok(policy) => {
                self.audit.record_decision(
                    "allow",
                    check_type,
                    resource_type,
                    None,
                    context,
                    Some(&policy.version),
                    Some(match policy.mode {
                        crate::risk::policy::RiskPolicyMode::Advisory => "advisory",
                        crate::risk::policy::RiskPolicyMode::Enforced => "enforced",
                    }),
                    Some("RISK_ALLOW"),
                    None,
                    HashMap::new(),
                );
                Ok(())
            }
            Err(err) => {
                self.audit.record_decision(
                    "block",
                    check_type,
                    resource_type,
                    None,
                    context,
                    Some("risk-policy.v1"),
                    None,
                    Some(&err.code),
                    Some(&err.message),
                    HashMap::new(),
                );
                Err(err)
            }
        }
    }

    fn deployment_scoped(
        &self,
        deployment_id: &str,
        context: &RequestContext,
    ) -> PlatformResult<DeploymentRecord> {
        self.store
            .deployments
            .read()
            .get(deployment_id)
            .filter(|deployment| deployment.tenant_id == context.tenant_id)
            .cloned()
            .ok_or_else(|| {
                PlatformApiError::new(
                    404,
                    "DEPLOYMENT_NOT_FOUND",
                    format!("Deployment {deployment_id} not found."),
                    &context.request_id,
                )
            })
    }

    fn order_scoped(&self, order_id: &str, context: &RequestContext) -> PlatformResult<OrderRecord> {
        self.store
            .orders
            .read()
            .get(order_id)
            .filter(|order| order.tenant_id == context.tenant_id)
            .cloned()
            .ok_or_else(|| {
                PlatformApiError::new(
                    404,
                    "ORDER_NOT_FOUND",
                    format!("Order {order_id} not found."),
                    &context.request_id,
                )
            })
    }

    /// Apply a provider-reported state to a stored deployment and feed the
    /// knowledge base on change.
    fn apply_provider_state(
        &self,
        deployment_id: &str,
        provider: &ProviderDeploymentState,
    ) -> DeploymentRecord {
        let (record, changed) = {
            let mut deployments = self.store.deployments.write();
            let deployment = deployments
                .get_mut(deployment_id)
                .expect("deployment disappeared while applying provider state");
            let next = apply_deployment_transition(&deployment.status, Some(&provider.status));
            let pnl_changed = provider
                .latest_pnl
                .map(|pnl| deployment.latest_pnl != Some(pnl))
                .unwrap_or(false);
            let changed = next != deployment.status || pnl_changed;
            deployment.status = next;
            if let Some(pnl) = provider.latest_pnl {
                deployment.latest_pnl = Some(pnl);
            }
            if changed {
                deployment.updated_at = utc_now();
            }
            (deployment.clone(), changed)
        };
        if changed {
            self.knowledge.ingest_deployment_outcome(&record);
        }
        record
    }

    fn upsert_deployment_from_provider(
        &self,
        request: &CreateDeploymentRequest,
        response: &ProviderDeploymentState,
        context: &RequestContext,
    ) -> DeploymentRecord {
        let existing = self
            .store
            .deployments
            .read()
            .values()
            .find(|deployment| {
                deployment.provider_ref_id.as_deref()
                    == Some(response.provider_deployment_id.as_str())
                    && deployment.tenant_id == context.tenant_id
            })
            .cloned();
        if let Some(deployment) = existing {
            return deployment;
        }

        let now = utc_now();
        let deployment = DeploymentRecord {
            id: self.store.next_id("dep"),
            strategy_id: request.strategy_id.clone(),
            mode: request.mode,
            status: apply_deployment_transition("queued", Some(&response.status)),
            capital: request.capital,
            provider_ref_id: Some(response.provider_deployment_id.clone()),
            latest_pnl: response.latest_pnl,
            created_at: now.clone(),
            updated_at: now,
            tenant_id: context.tenant_id.clone(),
            user_id: context.user_id.clone(),
        };
        self.store
            .deployments
            .write()
            .insert(deployment.id.clone(), deployment.clone());
        deployment
    }
}
