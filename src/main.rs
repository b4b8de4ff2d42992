//! TradeNexus - Trading Orchestration Control Plane
//! Mission: Mediate user trading intents through external providers with
//! risk policy, idempotency, tenant isolation, and reconciliation

use anyhow::{Context, Result};
use dotenv::dotenv;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradenexus_backend::api::{build_router, AppState};
use tradenexus_backend::config::Config;
use tradenexus_backend::middleware::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let config = Config::from_env();
    info!(bind_addr = %config.bind_addr, "TradeNexus control plane starting");

    let state = AppState::new(config.clone());
    spawn_reconciliation_cadence(&state);

    let limiter = RateLimitLayer::new(RateLimitConfig::default());
    let cleanup_limiter = limiter.clone();
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(120));
        loop {
            ticker.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    let app = build_router(state).layer(axum::middleware::from_fn_with_state(
        limiter,
        rate_limit_middleware,
    ));
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "HTTP surface listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("HTTP server terminated")?;
    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Background cadence that drives reconciliation for every resource owner.
/// List endpoints call the same entry points with a tighter throttle.
fn spawn_reconciliation_cadence(state: &AppState) {
    let reconciliation = state.reconciliation.clone();
    let cadence_seconds = (state.config.reconcile_min_interval_seconds * 4.0).max(30.0);

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs_f64(cadence_seconds));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for (tenant_id, user_id) in reconciliation.resource_owners() {
                match reconciliation
                    .run_drift_checks(&tenant_id, &user_id, None)
                    .await
                {
                    Ok(summary) if summary.drift_count > 0 => {
                        info!(
                            tenant_id = %tenant_id,
                            drift_count = summary.drift_count,
                            "Background reconciliation recorded drift"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(
                            tenant_id = %tenant_id,
                            code = %err.code,
                            "Background reconciliation pass failed"
                        );
                    }
                }
            }
        }
    });
}
