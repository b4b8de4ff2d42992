//! /v1 request handlers.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::context::{bad_request, idempotency_key, AppState};
use crate::errors::PlatformResult;
use crate::models::{CreateDeploymentRequest, CreateOrderRequest};
use crate::strategies::CreateBacktestRequest;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStrategyBody {
    pub name: String,
    pub description: String,
    pub provider: String,
}

pub async fn create_strategy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateStrategyBody>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    if body.name.trim().is_empty() {
        return Err(bad_request("Strategy name must not be empty.", &context));
    }
    let strategy = state
        .strategies
        .create_strategy(&body.name, &body.description, &body.provider, &context)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"requestId": context.request_id, "strategy": strategy})),
    ))
}

pub async fn list_strategies(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let items = state.strategies.list_strategies(&context);
    Ok(Json(json!({"requestId": context.request_id, "items": items})))
}

pub async fn get_strategy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(strategy_id): Path<String>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let strategy = state.strategies.get_strategy(&strategy_id, &context)?;
    Ok(Json(json!({"requestId": context.request_id, "strategy": strategy})))
}

pub async fn create_backtest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(strategy_id): Path<String>,
    Json(body): Json<CreateBacktestRequest>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    if body.dataset_ids.is_empty() {
        return Err(bad_request("datasetIds must not be empty.", &context));
    }
    let backtest = state
        .strategies
        .create_backtest(&strategy_id, &body, &context)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"requestId": context.request_id, "backtest": backtest})),
    ))
}

pub async fn list_backtests(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(strategy_id): Path<String>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let items = state.strategies.list_backtests(&strategy_id, &context)?;
    Ok(Json(json!({"requestId": context.request_id, "items": items})))
}

pub async fn get_backtest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(backtest_id): Path<String>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let backtest = state.strategies.get_backtest(&backtest_id, &context)?;
    Ok(Json(json!({"requestId": context.request_id, "backtest": backtest})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketScanBody {
    #[serde(default)]
    pub asset_classes: Vec<String>,
    #[serde(default)]
    pub capital: f64,
}

pub async fn market_scan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<MarketScanBody>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let scan = state
        .strategies
        .market_scan(&body.asset_classes, body.capital, &context)
        .await?;
    Ok(Json(json!({
        "requestId": context.request_id,
        "regimeSummary": scan.regime_summary,
        "strategyIdeas": scan
            .strategy_ideas
            .iter()
            .map(|(name, rationale, regime)| json!({
                "name": name,
                "rationale": rationale,
                "suitableRegime": regime,
            }))
            .collect::<Vec<Value>>(),
    })))
}

pub async fn create_deployment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateDeploymentRequest>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    if !body.capital.is_finite() || body.capital <= 0.0 {
        return Err(bad_request("capital must be a positive number.", &context));
    }
    let key = idempotency_key(&headers, &context);
    let deployment = state
        .execution
        .create_deployment(&body, &key, &context)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"requestId": context.request_id, "deployment": deployment})),
    ))
}

pub async fn list_deployments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let items = state.execution.list_deployments(&context).await?;
    Ok(Json(json!({"requestId": context.request_id, "items": items})))
}

pub async fn get_deployment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(deployment_id): Path<String>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let deployment = state.execution.get_deployment(&deployment_id, &context).await?;
    Ok(Json(json!({"requestId": context.request_id, "deployment": deployment})))
}

#[derive(Debug, Default, Deserialize)]
pub struct StopDeploymentBody {
    pub reason: Option<String>,
}

pub async fn stop_deployment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(deployment_id): Path<String>,
    body: Option<Json<StopDeploymentBody>>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let reason = body.and_then(|Json(body)| body.reason);
    let deployment = state
        .execution
        .stop_deployment(&deployment_id, reason.as_deref(), &context)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"requestId": context.request_id, "deployment": deployment})),
    ))
}

pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateOrderRequest>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    if !body.quantity.is_finite() || body.quantity <= 0.0 {
        return Err(bad_request("quantity must be a positive number.", &context));
    }
    let key = idempotency_key(&headers, &context);
    let order = state.execution.create_order(&body, &key, &context).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"requestId": context.request_id, "order": order})),
    ))
}

pub async fn list_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let items = state.execution.list_orders(&context).await?;
    Ok(Json(json!({"requestId": context.request_id, "items": items})))
}

pub async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let order = state.execution.get_order(&order_id, &context)?;
    Ok(Json(json!({"requestId": context.request_id, "order": order})))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let order = state.execution.cancel_order(&order_id, &context).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"requestId": context.request_id, "order": order})),
    ))
}

pub async fn get_portfolio(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(mode): Path<String>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    if mode != "paper" && mode != "live" {
        return Err(bad_request("mode must be paper or live.", &context));
    }
    let portfolio = state.execution.get_portfolio(&mode, &context).await?;
    Ok(Json(json!({"requestId": context.request_id, "portfolio": portfolio})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetUploadInitBody {
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub size_bytes: u64,
}

pub async fn dataset_upload_init(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DatasetUploadInitBody>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    if body.filename.trim().is_empty() {
        return Err(bad_request("filename must not be empty.", &context));
    }
    let dataset = state
        .datasets
        .init_upload(&body.filename, body.size_bytes, &context);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "requestId": context.request_id,
            "datasetId": dataset.id,
            "dataset": dataset,
        })),
    ))
}

pub async fn dataset_upload_complete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(dataset_id): Path<String>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let dataset = state.datasets.complete_upload(&dataset_id, &context)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"requestId": context.request_id, "dataset": dataset})),
    ))
}

pub async fn dataset_publish(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(dataset_id): Path<String>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let dataset = state.datasets.publish(&dataset_id, "lona", &context).await?;
    Ok(Json(json!({"requestId": context.request_id, "dataset": dataset})))
}

pub async fn get_dataset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(dataset_id): Path<String>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let dataset = state.datasets.get(&dataset_id, &context)?;
    Ok(Json(json!({"requestId": context.request_id, "dataset": dataset})))
}

pub async fn get_risk_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let policy = state.store.risk_policy_document();
    Ok(Json(json!({"requestId": context.request_id, "policy": policy})))
}

pub async fn list_risk_audit(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let items = state.audit.list_for_tenant(&context);
    Ok(Json(json!({"requestId": context.request_id, "items": items})))
}

pub async fn list_drift_events(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let items = state.execution.list_drift_events(&context);
    Ok(Json(json!({"requestId": context.request_id, "items": items})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRunBody {
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub payload: Value,
}

pub async fn enqueue_orchestrator_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<EnqueueRunBody>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let run_id = state.store.next_id("orch");
    let run = state
        .orchestrator
        .enqueue(&run_id, body.priority, body.payload)
        .map_err(|err| bad_request(err.to_string(), &context))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"requestId": context.request_id, "run": run})),
    ))
}

pub async fn get_orchestrator_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let run = state.orchestrator.get_run(&run_id).ok_or_else(|| {
        crate::errors::PlatformApiError::new(
            404,
            "ORCHESTRATOR_RUN_NOT_FOUND",
            format!("Orchestrator run {run_id} not found."),
            &context.request_id,
        )
    })?;
    Ok(Json(json!({"requestId": context.request_id, "run": run})))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRunBody {
    pub reason: Option<String>,
}

pub async fn cancel_orchestrator_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
    body: Option<Json<CancelRunBody>>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let reason = body
        .and_then(|Json(body)| body.reason)
        .unwrap_or_else(|| "cancelled_by_request".to_string());
    let run = state.orchestrator.cancel(&run_id, &reason).map_err(|err| {
        crate::errors::PlatformApiError::new(
            409,
            "ORCHESTRATOR_TRANSITION_INVALID",
            err.to_string(),
            &context.request_id,
        )
    })?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"requestId": context.request_id, "run": run})),
    ))
}

pub async fn list_orchestrator_traces(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let items = state.orchestrator.list_run_traces(&run_id);
    Ok(Json(json!({"requestId": context.request_id, "items": items})))
}
