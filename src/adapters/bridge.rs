//! Data bridge adapter: dataset-reference resolution and publish mapping.

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::AdapterError;
use crate::store::StateStore;

/// Boundary for dataset -> provider data resolution.
#[async_trait]
pub trait DataBridgeAdapter: Send + Sync {
    /// Resolve platform dataset ids to provider data ids. Fails unless every
    /// input is already published.
    async fn resolve_dataset_refs(
        &self,
        dataset_ids: &[String],
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<String>, AdapterError>;

    /// Ensure a dataset is published with the provider; returns the provider
    /// data id, allocating a mapping on first publish.
    async fn ensure_published(
        &self,
        dataset_id: &str,
        mode: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<String, AdapterError>;
}

/// Baseline data bridge backed by the in-memory store's mapping table.
pub struct InMemoryDataBridgeAdapter {
    store: Arc<StateStore>,
}

impl InMemoryDataBridgeAdapter {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DataBridgeAdapter for InMemoryDataBridgeAdapter {
    async fn resolve_dataset_refs(
        &self,
        dataset_ids: &[String],
        _tenant_id: &str,
        _user_id: &str,
    ) -> Result<Vec<String>, AdapterError> {
        let map = self.store.dataset_provider_map.read();
        let mut provider_ids = Vec::with_capacity(dataset_ids.len());
        let mut unresolved = Vec::new();
        for dataset_id in dataset_ids {
            match map.get(dataset_id) {
                Some(provider_id) => provider_ids.push(provider_id.clone()),
                None => unresolved.push(dataset_id.clone()),
            }
        }
        if !unresolved.is_empty() {
            return Err(AdapterError::new(
                "Dataset references are not published.",
                "DATASET_NOT_PUBLISHED",
                404,
            ));
        }
        Ok(provider_ids)
    }

    async fn ensure_published(
        &self,
        dataset_id: &str,
        _mode: &str,
        _tenant_id: &str,
        _user_id: &str,
    ) -> Result<String, AdapterError> {
        if !self.store.datasets.read().contains_key(dataset_id) {
            return Err(AdapterError::new(
                format!("Dataset {dataset_id} not found."),
                "DATASET_NOT_FOUND",
                404,
            ));
        }

        let mut map = self.store.dataset_provider_map.write();
        if let Some(existing) = map.get(dataset_id) {
            return Ok(existing.clone());
        }
        let provider_id = format!("lona-symbol-{dataset_id}");
        map.insert(dataset_id.to_string(), provider_id.clone());
        Ok(provider_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_fails_when_any_reference_is_unpublished() {
        let store = Arc::new(StateStore::new());
        let bridge = InMemoryDataBridgeAdapter::new(store);

        let err = bridge
            .resolve_dataset_refs(
                &["dataset-btc-1h-2025".to_string(), "dataset-does-not-exist".to_string()],
                "tenant-a",
                "user-a",
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, "DATASET_NOT_PUBLISHED");
        assert_eq!(err.status_code, 404);
    }

    #[tokio::test]
    async fn test_resolve_returns_provider_ids_for_published_sets() {
        let store = Arc::new(StateStore::new());
        let bridge = InMemoryDataBridgeAdapter::new(store);

        let ids = bridge
            .resolve_dataset_refs(&["dataset-btc-1h-2025".to_string()], "tenant-a", "user-a")
            .await
            .unwrap();
        assert_eq!(ids, vec!["lona-symbol-dataset-btc-1h-2025".to_string()]);
    }

    #[tokio::test]
    async fn test_ensure_published_unknown_dataset_is_not_found() {
        let store = Arc::new(StateStore::new());
        let bridge = InMemoryDataBridgeAdapter::new(store);

        let err = bridge
            .ensure_published("dataset-missing", "lona", "tenant-a", "user-a")
            .await
            .unwrap_err();
        assert_eq!(err.code, "DATASET_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_ensure_published_is_stable_across_calls() {
        let store = Arc::new(StateStore::new());
        let bridge = InMemoryDataBridgeAdapter::new(store.clone());

        let first = bridge
            .ensure_published("dataset-btc-1h-2025", "lona", "tenant-a", "user-a")
            .await
            .unwrap();
        let second = bridge
            .ensure_published("dataset-btc-1h-2025", "lona", "tenant-a", "user-a")
            .await
            .unwrap();
        assert_eq!(first, second);
    }
}
