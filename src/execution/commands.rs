//! Execution command layer enforcing adapter-only side effects.
//!
//! This service is the only component permitted to issue side effects to the
//! execution provider. Create commands integrate the idempotency cache: a
//! replayed key returns the cached adapter response without re-executing the
//! side effect; a reused key with a different payload conflicts.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::adapters::execution::{ExecutionAdapter, ProviderDeploymentState, ProviderOrderState};
use crate::errors::{PlatformApiError, PlatformResult};
use crate::store::StateStore;

const DEPLOYMENT_SCOPE: &str = "execution_commands_deployments";
const ORDER_SCOPE: &str = "execution_commands_orders";

#[derive(Debug, Clone)]
pub struct CreateDeploymentCommand {
    pub strategy_id: String,
    pub mode: String,
    pub capital: f64,
    pub tenant_id: String,
    pub user_id: String,
    pub idempotency_key: String,
    pub request_id: String,
}

#[derive(Debug, Clone)]
pub struct StopDeploymentCommand {
    pub provider_deployment_id: String,
    pub reason: Option<String>,
    pub tenant_id: String,
    pub user_id: String,
    pub request_id: String,
}

#[derive(Debug, Clone)]
pub struct PlaceOrderCommand {
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub quantity: f64,
    pub price: Option<f64>,
    pub deployment_id: Option<String>,
    pub tenant_id: String,
    pub user_id: String,
    pub idempotency_key: String,
    pub request_id: String,
}

#[derive(Debug, Clone)]
pub struct CancelOrderCommand {
    pub provider_order_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub request_id: String,
}

/// Executes side-effecting commands exclusively through the execution adapter.
pub struct ExecutionCommandService {
    adapter: Arc<dyn ExecutionAdapter>,
    store: Arc<StateStore>,
}

impl ExecutionCommandService {
    pub fn new(adapter: Arc<dyn ExecutionAdapter>, store: Arc<StateStore>) -> Self {
        Self { adapter, store }
    }

    pub async fn create_deployment(
        &self,
        command: &CreateDeploymentCommand,
    ) -> PlatformResult<ProviderDeploymentState> {
        let payload = json!({
            "strategyId": command.strategy_id,
            "mode": command.mode,
            "capital": command.capital,
            "tenantId": command.tenant_id,
            "userId": command.user_id,
        });
        if let Some(cached) = self.load_idempotent(
            DEPLOYMENT_SCOPE,
            &command.idempotency_key,
            &payload,
            &command.request_id,
        )? {
            return Ok(deployment_from_cache(&cached));
        }

        let response = self
            .adapter
            .create_deployment(
                &command.strategy_id,
                &command.mode,
                command.capital,
                &command.tenant_id,
                &command.user_id,
                &command.idempotency_key,
            )
            .await
            .map_err(|err| PlatformApiError::from_adapter(err, &command.request_id))?;

        self.store.idempotent_save(
            DEPLOYMENT_SCOPE,
            &command.idempotency_key,
            &payload,
            &deployment_to_cache(&response),
        );
        Ok(response)
    }

    pub async fn stop_deployment(
        &self,
        command: &StopDeploymentCommand,
    ) -> PlatformResult<ProviderDeploymentState> {
        self.adapter
            .stop_deployment(
                &command.provider_deployment_id,
                command.reason.as_deref(),
                &command.tenant_id,
                &command.user_id,
            )
            .await
            .map_err(|err| PlatformApiError::from_adapter(err, &command.request_id))
    }

    pub async fn place_order(
        &self,
        command: &PlaceOrderCommand,
    ) -> PlatformResult<ProviderOrderState> {
        let payload = json!({
            "symbol": command.symbol,
            "side": command.side,
            "type": command.order_type,
            "quantity": command.quantity,
            "price": command.price,
            "deploymentId": command.deployment_id,
            "tenantId": command.tenant_id,
            "userId": command.user_id,
        });
        if let Some(cached) = self.load_idempotent(
            ORDER_SCOPE,
            &command.idempotency_key,
            &payload,
            &command.request_id,
        )? {
            return Ok(order_from_cache(&cached));
        }

        let response = self
            .adapter
            .place_order(
                &command.symbol,
                &command.side,
                &command.order_type,
                command.quantity,
                command.price,
                command.deployment_id.as_deref(),
                &command.tenant_id,
                &command.user_id,
                &command.idempotency_key,
            )
            .await
            .map_err(|err| PlatformApiError::from_adapter(err, &command.request_id))?;

        self.store.idempotent_save(
            ORDER_SCOPE,
            &command.idempotency_key,
            &payload,
            &order_to_cache(&response),
        );
        Ok(response)
    }

    pub async fn cancel_order(
        &self,
        command: &CancelOrderCommand,
    ) -> PlatformResult<ProviderOrderState> {
        self.adapter
            .cancel_order(
                &command.provider_order_id,
                &command.tenant_id,
                &command.user_id,
            )
            .await
            .map_err(|err| PlatformApiError::from_adapter(err, &command.request_id))
    }

    fn load_idempotent(
        &self,
        scope: &str,
        key: &str,
        payload: &Value,
        request_id: &str,
    ) -> PlatformResult<Option<Value>> {
        let (conflict, cached) = self.store.idempotent_lookup(scope, key, payload);
        if conflict {
            return Err(PlatformApiError::new(
                409,
                "IDEMPOTENCY_KEY_CONFLICT",
                "Idempotency-Key reused with different execution command payload.",
                request_id,
            ));
        }
        Ok(cached)
    }
}

fn deployment_to_cache(state: &ProviderDeploymentState) -> Value {
    json!({
        "providerDeploymentId": state.provider_deployment_id,
        "status": state.status,
        "latestPnl": state.latest_pnl,
    })
}

fn deployment_from_cache(value: &Value) -> ProviderDeploymentState {
    ProviderDeploymentState {
        provider_deployment_id: value["providerDeploymentId"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        status: value["status"].as_str().unwrap_or("failed").to_string(),
        latest_pnl: value["latestPnl"].as_f64(),
    }
}

fn order_to_cache(state: &ProviderOrderState) -> Value {
    json!({
        "providerOrderId": state.provider_order_id,
        "status": state.status,
    })
}

fn order_from_cache(value: &Value) -> ProviderOrderState {
    ProviderOrderState {
        provider_order_id: value["providerOrderId"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        status: value["status"].as_str().unwrap_or("failed").to_string(),
    }
}
