//! Trader-data provider adapter with a TTL'd market-context cache.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::errors::AdapterError;

/// Boundary to the trader-data provider (market context, regime summaries).
#[async_trait]
pub trait TraderDataAdapter: Send + Sync {
    async fn get_market_context(
        &self,
        asset_classes: &[String],
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Value, AdapterError>;
}

fn cache_key(asset_classes: &[String]) -> String {
    let mut sorted: Vec<String> = asset_classes
        .iter()
        .map(|asset| asset.to_lowercase())
        .collect();
    sorted.sort();
    sorted.join(",")
}

struct CachedContext {
    fetched_at: Instant,
    payload: Value,
}

/// HTTP adapter against the trader-data provider's internal API.
/// Context responses are cached per asset-class set for the configured TTL.
pub struct TraderDataHttpAdapter {
    base_url: String,
    service_api_key: String,
    client: reqwest::Client,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, CachedContext>>,
}

impl TraderDataHttpAdapter {
    pub fn new(
        base_url: impl Into<String>,
        service_api_key: impl Into<String>,
        timeout_seconds: f64,
        cache_ttl_seconds: f64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(timeout_seconds.max(0.0)))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into(),
            service_api_key: service_api_key.into(),
            client,
            cache_ttl: Duration::from_secs_f64(cache_ttl_seconds.max(0.0)),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Decode a provider response body; non-JSON payloads normalize into
    /// `TRADER_DATA_BAD_RESPONSE_JSON` (502).
    pub fn parse_response(body: &str) -> Result<Value, AdapterError> {
        serde_json::from_str(body).map_err(|_| {
            AdapterError::new(
                "Trader data provider returned a non-JSON payload.",
                "TRADER_DATA_BAD_RESPONSE_JSON",
                502,
            )
        })
    }

    fn cached(&self, key: &str) -> Option<Value> {
        let cache = self.cache.lock();
        cache.get(key).and_then(|entry| {
            (entry.fetched_at.elapsed() < self.cache_ttl).then(|| entry.payload.clone())
        })
    }

    fn store(&self, key: String, payload: Value) {
        self.cache.lock().insert(
            key,
            CachedContext {
                fetched_at: Instant::now(),
                payload,
            },
        );
    }
}

#[async_trait]
impl TraderDataAdapter for TraderDataHttpAdapter {
    async fn get_market_context(
        &self,
        asset_classes: &[String],
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Value, AdapterError> {
        let key = cache_key(asset_classes);
        if let Some(payload) = self.cached(&key) {
            return Ok(payload);
        }

        let url = format!("{}/internal/v1/context/market", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("X-Service-Api-Key", &self.service_api_key)
            .header("X-Tenant-Id", tenant_id)
            .header("X-User-Id", user_id)
            .query(&[("assetClasses", key.clone())])
            .send()
            .await
            .map_err(|err| {
                AdapterError::new(
                    format!("Trader data request failed: {err}"),
                    "TRADER_DATA_UNREACHABLE",
                    502,
                )
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            AdapterError::new(
                format!("Trader data response read failed: {err}"),
                "TRADER_DATA_BAD_RESPONSE_JSON",
                502,
            )
        })?;
        let payload = Self::parse_response(&body)?;
        if !status.is_success() {
            return Err(AdapterError::new(
                format!("Trader data provider returned status {status}."),
                "TRADER_DATA_UPSTREAM_ERROR",
                502,
            ));
        }

        self.store(key, payload.clone());
        Ok(payload)
    }
}

/// Baseline context provider used when no trader-data service is configured.
#[derive(Default)]
pub struct InMemoryTraderDataAdapter;

impl InMemoryTraderDataAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TraderDataAdapter for InMemoryTraderDataAdapter {
    async fn get_market_context(
        &self,
        asset_classes: &[String],
        _tenant_id: &str,
        _user_id: &str,
    ) -> Result<Value, AdapterError> {
        let focus = if asset_classes.is_empty() {
            "crypto".to_string()
        } else {
            asset_classes.join(", ")
        };
        Ok(json!({
            "regimeSummary": format!("Context for {focus}: sideways, medium volatility."),
            "assetClasses": asset_classes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_json_payload_maps_to_adapter_error() {
        let err = TraderDataHttpAdapter::parse_response("not-json").unwrap_err();
        assert_eq!(err.code, "TRADER_DATA_BAD_RESPONSE_JSON");
        assert_eq!(err.status_code, 502);
    }

    #[test]
    fn test_valid_json_parses() {
        let value = TraderDataHttpAdapter::parse_response("{\"regimeSummary\": \"ok\"}").unwrap();
        assert_eq!(value["regimeSummary"], "ok");
    }

    #[test]
    fn test_cache_key_is_order_and_case_insensitive() {
        let a = cache_key(&["Crypto".to_string(), "FX".to_string()]);
        let b = cache_key(&["fx".to_string(), "crypto".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_hit_within_ttl() {
        let adapter = TraderDataHttpAdapter::new("http://trader-data.local", "svc", 8.0, 120.0);
        adapter.store("crypto".to_string(), json!({"regimeSummary": "cached"}));
        assert_eq!(adapter.cached("crypto").unwrap()["regimeSummary"], "cached");
    }

    #[test]
    fn test_zero_ttl_never_caches() {
        let adapter = TraderDataHttpAdapter::new("http://trader-data.local", "svc", 8.0, 0.0);
        adapter.store("crypto".to_string(), json!({"regimeSummary": "cached"}));
        assert!(adapter.cached("crypto").is_none());
    }
}
