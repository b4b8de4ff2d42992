//! Live-execution engine adapter boundary.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::AdapterError;
use crate::models::{PortfolioRecord, PositionRecord};

/// Provider-reported deployment state.
#[derive(Debug, Clone)]
pub struct ProviderDeploymentState {
    pub provider_deployment_id: String,
    pub status: String,
    pub latest_pnl: Option<f64>,
}

/// Provider-reported order state.
#[derive(Debug, Clone)]
pub struct ProviderOrderState {
    pub provider_order_id: String,
    pub status: String,
}

/// Provider-reported portfolio snapshot.
#[derive(Debug, Clone)]
pub struct ProviderPortfolio {
    pub id: String,
    pub mode: String,
    pub cash: f64,
    pub total_value: f64,
    pub pnl_total: f64,
    pub positions: Vec<(String, f64, f64)>,
}

/// Boundary to the live-execution engine. All side effects against live or
/// paper deployments go through this trait.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn create_deployment(
        &self,
        strategy_id: &str,
        mode: &str,
        capital: f64,
        tenant_id: &str,
        user_id: &str,
        idempotency_key: &str,
    ) -> Result<ProviderDeploymentState, AdapterError>;

    async fn stop_deployment(
        &self,
        provider_deployment_id: &str,
        reason: Option<&str>,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<ProviderDeploymentState, AdapterError>;

    async fn get_deployment(
        &self,
        provider_deployment_id: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<ProviderDeploymentState, AdapterError>;

    async fn place_order(
        &self,
        symbol: &str,
        side: &str,
        order_type: &str,
        quantity: f64,
        price: Option<f64>,
        deployment_id: Option<&str>,
        tenant_id: &str,
        user_id: &str,
        idempotency_key: &str,
    ) -> Result<ProviderOrderState, AdapterError>;

    async fn cancel_order(
        &self,
        provider_order_id: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<ProviderOrderState, AdapterError>;

    async fn get_order(
        &self,
        provider_order_id: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Option<ProviderOrderState>, AdapterError>;

    async fn get_portfolio(
        &self,
        mode: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Option<ProviderPortfolio>, AdapterError>;
}

/// HTTP-backed adapter against the live-execution engine's internal API.
pub struct LiveEngineExecutionAdapter {
    base_url: String,
    service_api_key: String,
    client: reqwest::Client,
}

impl LiveEngineExecutionAdapter {
    pub fn new(base_url: impl Into<String>, service_api_key: impl Into<String>, timeout_seconds: f64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(timeout_seconds.max(0.0)))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into(),
            service_api_key: service_api_key.into(),
            client,
        }
    }

    /// Issue a request and decode the body. A body that is not valid JSON is
    /// normalized into `LIVE_ENGINE_BAD_RESPONSE_JSON` (502).
    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        payload: Option<&Value>,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Value, AdapterError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .request(method, &url)
            .header("X-Service-Api-Key", &self.service_api_key)
            .header("X-Tenant-Id", tenant_id)
            .header("X-User-Id", user_id);
        if let Some(payload) = payload {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(|err| {
            AdapterError::new(
                format!("Live engine request failed: {err}"),
                "LIVE_ENGINE_UNREACHABLE",
                502,
            )
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            AdapterError::new(
                format!("Live engine response read failed: {err}"),
                "LIVE_ENGINE_BAD_RESPONSE_JSON",
                502,
            )
        })?;

        let value: Value = serde_json::from_str(&body).map_err(|_| {
            AdapterError::new(
                "Live engine returned a non-JSON payload.",
                "LIVE_ENGINE_BAD_RESPONSE_JSON",
                502,
            )
        })?;

        if !status.is_success() {
            return Err(AdapterError::new(
                format!("Live engine returned status {status}."),
                "LIVE_ENGINE_UPSTREAM_ERROR",
                502,
            ));
        }
        Ok(value)
    }

    fn deployment_from(value: &Value) -> Result<ProviderDeploymentState, AdapterError> {
        let deployment = value.get("deployment").unwrap_or(value);
        let provider_deployment_id = deployment
            .get("providerRefId")
            .or_else(|| deployment.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| bad_shape("deployment id missing"))?;
        let status = deployment
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_shape("deployment status missing"))?;
        Ok(ProviderDeploymentState {
            provider_deployment_id: provider_deployment_id.to_string(),
            status: status.to_string(),
            latest_pnl: deployment.get("latestPnl").and_then(Value::as_f64),
        })
    }

    fn order_from(value: &Value) -> Result<ProviderOrderState, AdapterError> {
        let order = value.get("order").unwrap_or(value);
        let provider_order_id = order
            .get("providerOrderId")
            .or_else(|| order.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| bad_shape("order id missing"))?;
        let status = order
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_shape("order status missing"))?;
        Ok(ProviderOrderState {
            provider_order_id: provider_order_id.to_string(),
            status: status.to_string(),
        })
    }
}

fn bad_shape(detail: &str) -> AdapterError {
    AdapterError::new(
        format!("Live engine payload malformed: {detail}."),
        "LIVE_ENGINE_BAD_RESPONSE_JSON",
        502,
    )
}

#[async_trait]
impl ExecutionAdapter for LiveEngineExecutionAdapter {
    async fn create_deployment(
        &self,
        strategy_id: &str,
        mode: &str,
        capital: f64,
        tenant_id: &str,
        user_id: &str,
        idempotency_key: &str,
    ) -> Result<ProviderDeploymentState, AdapterError> {
        let payload = json!({
            "strategyId": strategy_id,
            "mode": mode,
            "capital": capital,
            "idempotencyKey": idempotency_key,
        });
        let value = self
            .request(
                reqwest::Method::POST,
                "/api/internal/deployments",
                Some(&payload),
                tenant_id,
                user_id,
            )
            .await?;
        Self::deployment_from(&value)
    }

    async fn stop_deployment(
        &self,
        provider_deployment_id: &str,
        reason: Option<&str>,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<ProviderDeploymentState, AdapterError> {
        let payload = json!({ "reason": reason });
        let value = self
            .request(
                reqwest::Method::POST,
                &format!("/api/internal/deployments/{provider_deployment_id}/stop"),
                Some(&payload),
                tenant_id,
                user_id,
            )
            .await?;
        Self::deployment_from(&value)
    }

    async fn get_deployment(
        &self,
        provider_deployment_id: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<ProviderDeploymentState, AdapterError> {
        let value = self
            .request(
                reqwest::Method::GET,
                &format!("/api/internal/deployments/{provider_deployment_id}"),
                None,
                tenant_id,
                user_id,
            )
            .await?;
        Self::deployment_from(&value)
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: &str,
        order_type: &str,
        quantity: f64,
        price: Option<f64>,
        deployment_id: Option<&str>,
        tenant_id: &str,
        user_id: &str,
        idempotency_key: &str,
    ) -> Result<ProviderOrderState, AdapterError> {
        let payload = json!({
            "symbol": symbol,
            "side": side,
            "type": order_type,
            "quantity": quantity,
            "price": price,
            "deploymentId": deployment_id,
            "idempotencyKey": idempotency_key,
        });
        let value = self
            .request(
                reqwest::Method::POST,
                "/api/internal/orders",
                Some(&payload),
                tenant_id,
                user_id,
            )
            .await?;
        Self::order_from(&value)
    }

    async fn cancel_order(
        &self,
        provider_order_id: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<ProviderOrderState, AdapterError> {
        let value = self
            .request(
                reqwest::Method::POST,
                &format!("/api/internal/orders/{provider_order_id}/cancel"),
                None,
                tenant_id,
                user_id,
            )
            .await?;
        Self::order_from(&value)
    }

    async fn get_order(
        &self,
        provider_order_id: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Option<ProviderOrderState>, AdapterError> {
        let value = self
            .request(
                reqwest::Method::GET,
                &format!("/api/internal/orders/{provider_order_id}"),
                None,
                tenant_id,
                user_id,
            )
            .await;
        match value {
            Ok(value) => Ok(Some(Self::order_from(&value)?)),
            Err(err) if err.code == "LIVE_ENGINE_UPSTREAM_ERROR" => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn get_portfolio(
        &self,
        mode: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Option<ProviderPortfolio>, AdapterError> {
        let value = self
            .request(
                reqwest::Method::GET,
                &format!("/api/internal/portfolios/portfolio-{mode}-001"),
                None,
                tenant_id,
                user_id,
            )
            .await?;
        let portfolio = value.get("portfolio").unwrap_or(&value);
        let id = match portfolio.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => return Ok(None),
        };
        let positions = portfolio
            .get("positions")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        Some((
                            entry.get("symbol")?.as_str()?.to_string(),
                            entry.get("quantity")?.as_f64()?,
                            entry.get("currentPrice")?.as_f64()?,
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Some(ProviderPortfolio {
            id,
            mode: portfolio
                .get("mode")
                .and_then(Value::as_str)
                .unwrap_or(mode)
                .to_string(),
            cash: portfolio.get("cash").and_then(Value::as_f64).unwrap_or(0.0),
            total_value: portfolio
                .get("totalValue")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            pnl_total: portfolio
                .get("pnlTotal")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            positions,
        }))
    }
}

#[derive(Debug, Clone)]
struct SimulatedDeployment {
    status: String,
    latest_pnl: Option<f64>,
}

/// In-process baseline engine used when no live engine is configured.
/// Deployments start `queued`, stops report `stopping`, orders start
/// `pending` and cancels report `cancelled`.
#[derive(Default)]
pub struct InMemoryExecutionAdapter {
    counter: Mutex<u64>,
    deployments: Mutex<HashMap<String, SimulatedDeployment>>,
    orders: Mutex<HashMap<String, String>>,
}

impl InMemoryExecutionAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/ops hook: set the provider-side state for a deployment.
    pub fn set_deployment_state(&self, provider_deployment_id: &str, status: &str, latest_pnl: Option<f64>) {
        self.deployments.lock().insert(
            provider_deployment_id.to_string(),
            SimulatedDeployment {
                status: status.to_string(),
                latest_pnl,
            },
        );
    }

    /// Test/ops hook: set the provider-side state for an order.
    pub fn set_order_state(&self, provider_order_id: &str, status: &str) {
        self.orders
            .lock()
            .insert(provider_order_id.to_string(), status.to_string());
    }

    fn next(&self, prefix: &str) -> String {
        let mut counter = self.counter.lock();
        *counter += 1;
        format!("{}-{:04}", prefix, counter)
    }
}

#[async_trait]
impl ExecutionAdapter for InMemoryExecutionAdapter {
    async fn create_deployment(
        &self,
        _strategy_id: &str,
        _mode: &str,
        _capital: f64,
        _tenant_id: &str,
        _user_id: &str,
        _idempotency_key: &str,
    ) -> Result<ProviderDeploymentState, AdapterError> {
        let id = self.next("live-dep");
        self.deployments.lock().insert(
            id.clone(),
            SimulatedDeployment {
                status: "queued".to_string(),
                latest_pnl: None,
            },
        );
        Ok(ProviderDeploymentState {
            provider_deployment_id: id,
            status: "queued".to_string(),
            latest_pnl: None,
        })
    }

    async fn stop_deployment(
        &self,
        provider_deployment_id: &str,
        _reason: Option<&str>,
        _tenant_id: &str,
        _user_id: &str,
    ) -> Result<ProviderDeploymentState, AdapterError> {
        let mut deployments = self.deployments.lock();
        let entry = deployments
            .entry(provider_deployment_id.to_string())
            .or_insert_with(|| SimulatedDeployment {
                status: "stopping".to_string(),
                latest_pnl: None,
            });
        entry.status = "stopping".to_string();
        Ok(ProviderDeploymentState {
            provider_deployment_id: provider_deployment_id.to_string(),
            status: entry.status.clone(),
            latest_pnl: entry.latest_pnl,
        })
    }

    async fn get_deployment(
        &self,
        provider_deployment_id: &str,
        _tenant_id: &str,
        _user_id: &str,
    ) -> Result<ProviderDeploymentState, AdapterError> {
        let deployments = self.deployments.lock();
        let entry = deployments.get(provider_deployment_id);
        Ok(ProviderDeploymentState {
            provider_deployment_id: provider_deployment_id.to_string(),
            status: entry.map(|e| e.status.clone()).unwrap_or_else(|| "running".to_string()),
            latest_pnl: entry.and_then(|e| e.latest_pnl),
        })
    }

    async fn place_order(
        &self,
        _symbol: &str,
        _side: &str,
        _order_type: &str,
        _quantity: f64,
        _price: Option<f64>,
        _deployment_id: Option<&str>,
        _tenant_id: &str,
        _user_id: &str,
        _idempotency_key: &str,
    ) -> Result<ProviderOrderState, AdapterError> {
        let id = self.next("live-order");
        self.orders.lock().insert(id.clone(), "pending".to_string());
        Ok(ProviderOrderState {
            provider_order_id: id,
            status: "pending".to_string(),
        })
    }

    async fn cancel_order(
        &self,
        provider_order_id: &str,
        _tenant_id: &str,
        _user_id: &str,
    ) -> Result<ProviderOrderState, AdapterError> {
        self.orders
            .lock()
            .insert(provider_order_id.to_string(), "cancelled".to_string());
        Ok(ProviderOrderState {
            provider_order_id: provider_order_id.to_string(),
            status: "cancelled".to_string(),
        })
    }

    async fn get_order(
        &self,
        provider_order_id: &str,
        _tenant_id: &str,
        _user_id: &str,
    ) -> Result<Option<ProviderOrderState>, AdapterError> {
        Ok(self.orders.lock().get(provider_order_id).map(|status| {
            ProviderOrderState {
                provider_order_id: provider_order_id.to_string(),
                status: status.clone(),
            }
        }))
    }

    async fn get_portfolio(
        &self,
        mode: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Option<ProviderPortfolio>, AdapterError> {
        let _ = (tenant_id, user_id);
        Ok(Some(ProviderPortfolio {
            id: format!("portfolio-{mode}-001"),
            mode: mode.to_string(),
            cash: 80_000.0,
            total_value: 100_000.0,
            pnl_total: 0.0,
            positions: vec![("BTCUSDT".to_string(), 0.25, 64_000.0)],
        }))
    }
}

/// Convert a provider portfolio into the platform record shape.
pub fn portfolio_record_from_provider(
    portfolio: ProviderPortfolio,
    tenant_id: &str,
    user_id: &str,
) -> PortfolioRecord {
    PortfolioRecord {
        id: portfolio.id,
        mode: if portfolio.mode == "live" {
            crate::models::DeploymentMode::Live
        } else {
            crate::models::DeploymentMode::Paper
        },
        cash: portfolio.cash,
        total_value: portfolio.total_value,
        pnl_total: portfolio.pnl_total,
        positions: portfolio
            .positions
            .into_iter()
            .map(|(symbol, quantity, current_price)| PositionRecord {
                symbol,
                quantity,
                current_price,
            })
            .collect(),
        tenant_id: tenant_id.to_string(),
        user_id: user_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_json_payload_maps_to_bad_response_json() {
        let err = serde_json::from_str::<Value>("<html>not-json</html>")
            .map_err(|_| {
                AdapterError::new(
                    "Live engine returned a non-JSON payload.",
                    "LIVE_ENGINE_BAD_RESPONSE_JSON",
                    502,
                )
            })
            .unwrap_err();
        assert_eq!(err.code, "LIVE_ENGINE_BAD_RESPONSE_JSON");
        assert_eq!(err.status_code, 502);
    }

    #[test]
    fn test_deployment_shape_parsing() {
        let value = json!({
            "deployment": {
                "id": "dep-123",
                "providerRefId": "live-dep-123",
                "status": "running",
                "latestPnl": 12.5,
            }
        });
        let state = LiveEngineExecutionAdapter::deployment_from(&value).unwrap();
        assert_eq!(state.provider_deployment_id, "live-dep-123");
        assert_eq!(state.status, "running");
        assert_eq!(state.latest_pnl, Some(12.5));
    }

    #[test]
    fn test_malformed_deployment_shape_rejected() {
        let value = json!({"deployment": {"id": "dep-123"}});
        let err = LiveEngineExecutionAdapter::deployment_from(&value).unwrap_err();
        assert_eq!(err.code, "LIVE_ENGINE_BAD_RESPONSE_JSON");
    }

    #[tokio::test]
    async fn test_in_memory_adapter_lifecycle() {
        let adapter = InMemoryExecutionAdapter::new();
        let created = adapter
            .create_deployment("strat-001", "paper", 10_000.0, "tenant-a", "user-a", "idem-1")
            .await
            .unwrap();
        assert_eq!(created.status, "queued");

        adapter.set_deployment_state(&created.provider_deployment_id, "running", Some(25.0));
        let fetched = adapter
            .get_deployment(&created.provider_deployment_id, "tenant-a", "user-a")
            .await
            .unwrap();
        assert_eq!(fetched.status, "running");
        assert_eq!(fetched.latest_pnl, Some(25.0));

        let stopped = adapter
            .stop_deployment(&created.provider_deployment_id, Some("test"), "tenant-a", "user-a")
            .await
            .unwrap();
        assert_eq!(stopped.status, "stopping");
    }
}
