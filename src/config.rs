//! Runtime configuration
//! Mission: Parse environment safely; malformed values fall back to defaults

use std::env;

pub const DEFAULT_ADAPTER_TIMEOUT_SECONDS: f64 = 8.0;
pub const DEFAULT_MARKET_CONTEXT_CACHE_TTL_SECONDS: f64 = 120.0;
pub const DEFAULT_RECONCILE_MIN_INTERVAL_SECONDS: f64 = 30.0;
pub const DEFAULT_JWT_SECRET: &str = "dev-platform-auth-secret";

/// Parse a float env var, falling back to `default` on missing or malformed
/// values and clamping to `minimum`. Startup never fails on bad input.
pub fn float_env(name: &str, default: f64, minimum: f64) -> f64 {
    let parsed = env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default);
    parsed.max(minimum)
}

/// Non-empty string env var or default.
pub fn string_env(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Optional string env var; empty counts as unset.
pub fn optional_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

/// Process-wide configuration, resolved once at startup and injected from
/// there. No global mutable settings cache.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub service_api_key: String,
    pub live_engine_base_url: Option<String>,
    pub trader_data_base_url: Option<String>,
    pub live_engine_timeout_seconds: f64,
    pub trader_data_timeout_seconds: f64,
    pub market_context_cache_ttl_seconds: f64,
    pub reconcile_min_interval_seconds: f64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: string_env("PLATFORM_BIND_ADDR", "0.0.0.0:8080"),
            jwt_secret: string_env("PLATFORM_AUTH_JWT_HS256_SECRET", DEFAULT_JWT_SECRET),
            service_api_key: string_env("PLATFORM_SERVICE_API_KEY", "svc-local-key"),
            live_engine_base_url: optional_env("LIVE_ENGINE_BASE_URL"),
            trader_data_base_url: optional_env("TRADER_DATA_BASE_URL"),
            live_engine_timeout_seconds: float_env(
                "LIVE_ENGINE_TIMEOUT_SECONDS",
                DEFAULT_ADAPTER_TIMEOUT_SECONDS,
                0.0,
            ),
            trader_data_timeout_seconds: float_env(
                "TRADER_DATA_TIMEOUT_SECONDS",
                DEFAULT_ADAPTER_TIMEOUT_SECONDS,
                0.0,
            ),
            market_context_cache_ttl_seconds: float_env(
                "PLATFORM_MARKET_CONTEXT_CACHE_TTL_SECONDS",
                DEFAULT_MARKET_CONTEXT_CACHE_TTL_SECONDS,
                0.0,
            ),
            reconcile_min_interval_seconds: float_env(
                "PLATFORM_RECONCILE_MIN_INTERVAL_SECONDS",
                DEFAULT_RECONCILE_MIN_INTERVAL_SECONDS,
                0.0,
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            service_api_key: "svc-local-key".to_string(),
            live_engine_base_url: None,
            trader_data_base_url: None,
            live_engine_timeout_seconds: DEFAULT_ADAPTER_TIMEOUT_SECONDS,
            trader_data_timeout_seconds: DEFAULT_ADAPTER_TIMEOUT_SECONDS,
            market_context_cache_ttl_seconds: DEFAULT_MARKET_CONTEXT_CACHE_TTL_SECONDS,
            reconcile_min_interval_seconds: DEFAULT_RECONCILE_MIN_INTERVAL_SECONDS,
        }
    }
}
