//! /v2 request handlers (additive knowledge, market, validation surface).

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::context::{bad_request, AppState};
use crate::errors::{PlatformApiError, PlatformResult};
use crate::validation::store::{parse_decision, ReplayBlockingFlags, ValidationActor};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSearchBody {
    pub query: String,
    #[serde(default)]
    pub assets: Option<Vec<String>>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

pub async fn knowledge_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<KnowledgeSearchBody>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let items = state
        .knowledge_query
        .search(&body.query, body.assets.as_deref(), body.limit);
    Ok(Json(json!({"requestId": context.request_id, "items": items})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternListQuery {
    pub pattern_type: Option<String>,
    pub asset: Option<String>,
    #[serde(default = "default_pattern_limit")]
    pub limit: usize,
}

fn default_pattern_limit() -> usize {
    25
}

pub async fn list_patterns(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PatternListQuery>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let items = state.knowledge_query.list_patterns(
        query.pattern_type.as_deref(),
        query.asset.as_deref(),
        query.limit,
    );
    Ok(Json(json!({"requestId": context.request_id, "items": items})))
}

pub async fn get_regime(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(asset): Path<String>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let regime = state.knowledge_query.get_regime(&asset).ok_or_else(|| {
        PlatformApiError::new(
            404,
            "KNOWLEDGE_REGIME_NOT_FOUND",
            format!("No active regime found for {asset}."),
            &context.request_id,
        )
    })?;
    Ok(Json(json!({"requestId": context.request_id, "regime": regime})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketScanV2Body {
    #[serde(default)]
    pub asset_classes: Vec<String>,
    #[serde(default)]
    pub capital: f64,
}

/// Market scan enriched with knowledge evidence and data-context summary.
pub async fn market_scan_v2(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<MarketScanV2Body>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let scan = state
        .strategies
        .market_scan(&body.asset_classes, body.capital, &context)
        .await?;

    let evidence_query = if body.asset_classes.is_empty() {
        "market".to_string()
    } else {
        body.asset_classes.join(" ")
    };
    let evidence = state
        .knowledge_query
        .search(&evidence_query, Some(&body.asset_classes), 5);

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
        "knowledgeEvidence": evidence,
        "dataContextSummary": scan.data_context_summary.unwrap_or_else(|| "Context unavailable.".to_string()),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateValidationRunBody {
    pub actor: String,
    #[serde(default = "default_profile")]
    pub profile: String,
    pub decision: String,
    pub metric_drift_pct: f64,
    pub artifact_ref: String,
}

fn default_profile() -> String {
    "STANDARD".to_string()
}

pub async fn create_validation_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateValidationRunBody>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let actor = match body.actor.as_str() {
        "user" => ValidationActor::User,
        "bot" => ValidationActor::Bot,
        _ => return Err(bad_request("actor must be user or bot.", &context)),
    };
    let decision = parse_decision(&body.decision)
        .ok_or_else(|| bad_request("decision must be pass, conditional_pass, or fail.", &context))?;
    let run = state.validation.create_run(
        actor,
        &body.profile,
        decision,
        body.metric_drift_pct,
        &body.artifact_ref,
        &context,
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({"requestId": context.request_id, "run": run})),
    ))
}

pub async fn get_validation_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let run = state.validation.get_run(&run_id, &context)?;
    Ok(Json(json!({"requestId": context.request_id, "run": run})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteBaselineBody {
    pub run_id: String,
}

pub async fn promote_validation_baseline(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PromoteBaselineBody>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let baseline = state.validation.promote_baseline(&body.run_id, &context)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"requestId": context.request_id, "baseline": baseline})),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayBody {
    pub baseline_id: String,
    pub candidate_run_id: String,
    pub metric_drift_threshold_pct: f64,
    #[serde(default)]
    pub block_merge_on_fail: bool,
    #[serde(default)]
    pub block_release_on_fail: bool,
    #[serde(default)]
    pub block_merge_on_agent_fail: bool,
    #[serde(default)]
    pub block_release_on_agent_fail: bool,
}

pub async fn validation_replay(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ReplayBody>,
) -> PlatformResult<impl IntoResponse> {
    let context = state.authenticate(&headers)?;
    let replay = state.validation.replay(
        &body.baseline_id,
        &body.candidate_run_id,
        body.metric_drift_threshold_pct,
        ReplayBlockingFlags {
            block_merge_on_fail: body.block_merge_on_fail,
            block_release_on_fail: body.block_release_on_fail,
            block_merge_on_agent_fail: body.block_merge_on_agent_fail,
            block_release_on_agent_fail: body.block_release_on_agent_fail,
        },
        &context,
    )?;
    Ok(Json(json!({"requestId": context.request_id, "replay": replay})))
}
