//! API Routes
//! Mission: Compose the versioned HTTP surface

use axum::{
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;

use crate::api::context::{request_id_from, AppState};
use crate::api::{v1, v2};
use crate::errors::error_envelope;

/// Build the full application router: `/health` plus the versioned surfaces.
pub fn build_router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/strategies", post(v1::create_strategy).get(v1::list_strategies))
        .route("/strategies/:id", get(v1::get_strategy))
        .route(
            "/strategies/:id/backtests",
            post(v1::create_backtest).get(v1::list_backtests),
        )
        .route("/backtests/:id", get(v1::get_backtest))
        .route("/market-scan", post(v1::market_scan))
        .route("/deployments", post(v1::create_deployment).get(v1::list_deployments))
        .route("/deployments/:id", get(v1::get_deployment))
        .route("/deployments/:id/stop", post(v1::stop_deployment))
        .route("/orders", post(v1::create_order).get(v1::list_orders))
        .route("/orders/:id", get(v1::get_order))
        .route("/orders/:id/cancel", post(v1::cancel_order))
        .route("/portfolios/:mode", get(v1::get_portfolio))
        .route("/datasets/uploads/init", post(v1::dataset_upload_init))
        .route("/datasets/:id/uploads/complete", post(v1::dataset_upload_complete))
        .route("/datasets/:id/publish/lona", post(v1::dataset_publish))
        .route("/datasets/:id", get(v1::get_dataset))
        .route("/risk/policy", get(v1::get_risk_policy))
        .route("/risk/audit", get(v1::list_risk_audit))
        .route("/drift-events", get(v1::list_drift_events))
        .route("/orchestrator/runs", post(v1::enqueue_orchestrator_run))
        .route("/orchestrator/runs/:id", get(v1::get_orchestrator_run))
        .route("/orchestrator/runs/:id/cancel", post(v1::cancel_orchestrator_run))
        .route("/orchestrator/runs/:id/traces", get(v1::list_orchestrator_traces));

    let v2_routes = Router::new()
        .route("/knowledge/search", post(v2::knowledge_search))
        .route("/knowledge/patterns", get(v2::list_patterns))
        .route("/knowledge/regimes/:asset", get(v2::get_regime))
        .route("/market-scan", post(v2::market_scan_v2))
        .route("/validation/runs", post(v2::create_validation_run))
        .route("/validation/runs/:id", get(v2::get_validation_run))
        .route("/validation/baselines", post(v2::promote_validation_baseline))
        .route("/validation/replays", post(v2::validation_replay));

    Router::new()
        .route("/health", get(health))
        .nest("/v1", v1_routes)
        .nest("/v2", v2_routes)
        .fallback(route_not_found)
        .layer(axum::middleware::from_fn(crate::middleware::request_logging))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn route_not_found(headers: HeaderMap) -> impl IntoResponse {
    let request_id = request_id_from(&headers);
    (
        StatusCode::NOT_FOUND,
        Json(error_envelope(
            "ROUTE_NOT_FOUND",
            "The requested route does not exist.",
            &request_id,
            None,
        )),
    )
}

/// Last-resort guard: an unhandled panic renders the canonical envelope
/// without leaking internals.
fn handle_panic(_err: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    tracing::error!("Unhandled panic in request handler");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(error_envelope(
            "INTERNAL_ERROR",
            "Internal server error",
            "req-unknown",
            None,
        )),
    )
        .into_response()
}
