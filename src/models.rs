use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Current UTC time as an RFC3339 string, the wire format for all timestamps.
pub fn utc_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Identity and correlation context propagated through every operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: String,
    pub tenant_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

impl RequestContext {
    pub fn new(
        request_id: impl Into<String>,
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            user_email: None,
        }
    }
}

/// Deployment execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    Paper,
    Live,
}

impl DeploymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::Paper => "paper",
            DeploymentMode::Live => "live",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ref_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub tenant_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRecord {
    pub id: String,
    pub strategy_id: String,
    pub dataset_ids: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub initial_cash: f64,
    pub status: String,
    pub metrics: HashMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_report_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub tenant_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub id: String,
    pub strategy_id: String,
    pub mode: DeploymentMode,
    pub status: String,
    pub capital: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ref_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_pnl: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
    pub tenant_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub quantity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_order_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub tenant_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRecord {
    pub symbol: String,
    pub quantity: f64,
    pub current_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioRecord {
    pub id: String,
    pub mode: DeploymentMode,
    pub cash: f64,
    pub total_value: f64,
    pub pnl_total: f64,
    pub positions: Vec<PositionRecord>,
    pub tenant_id: String,
    pub user_id: String,
}

/// Dataset publish lifecycle states
pub const DATASET_STATUS_INITIALIZED: &str = "initialized";
pub const DATASET_STATUS_UPLOADED: &str = "uploaded";
pub const DATASET_STATUS_VALIDATED: &str = "validated";
pub const DATASET_STATUS_TRANSFORMED: &str = "transformed";
pub const DATASET_STATUS_PUBLISHED: &str = "published";
pub const DATASET_STATUS_PUBLISH_FAILED: &str = "publish_failed";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRecord {
    pub id: String,
    pub filename: String,
    pub size_bytes: u64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_data_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub tenant_id: String,
    pub user_id: String,
}

/// Orchestrator run tracked by the queue service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorRunRecord {
    pub id: String,
    pub state: String,
    pub priority: i64,
    pub attempts: u32,
    pub failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    pub payload: Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorTraceRecord {
    pub id: String,
    pub run_id: String,
    pub event: String,
    pub step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_state: Option<String>,
    pub request_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub metadata: HashMap<String, Value>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftEventRecord {
    pub id: String,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ref_id: Option<String>,
    pub previous_state: String,
    pub provider_state: String,
    pub resolution: String,
    pub metadata: HashMap<String, Value>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAuditRecord {
    pub id: String,
    pub decision: String,
    pub check_type: String,
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub request_id: String,
    pub tenant_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub metadata: HashMap<String, Value>,
    pub created_at: String,
}

/// Request to create a deployment, as received on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentRequest {
    pub strategy_id: String,
    pub mode: DeploymentMode,
    pub capital: f64,
}

/// Request to place an order, as received on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
}

/// Cached idempotent command response.
#[derive(Debug, Clone)]
pub struct IdempotencyEntry {
    pub fingerprint: String,
    pub response: Value,
    pub created_at: String,
}

/// Research provider spend guardrail document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchProviderBudget {
    pub max_total_cost_usd: f64,
    pub max_per_request_cost_usd: f64,
    pub estimated_market_scan_cost_usd: f64,
    pub spent_cost_usd: f64,
}

impl Default for ResearchProviderBudget {
    fn default() -> Self {
        Self {
            max_total_cost_usd: 25.0,
            max_per_request_cost_usd: 1.0,
            estimated_market_scan_cost_usd: 0.4,
            spent_cost_usd: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchBudgetEvent {
    pub decision: String,
    pub reason: String,
    pub estimated_cost_usd: f64,
    pub spent_after_usd: f64,
    pub request_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub created_at: String,
}
