//! Dataset lifecycle service
//! Mission: Upload lifecycle and publish flow over the data bridge

use std::sync::Arc;

use crate::adapters::bridge::DataBridgeAdapter;
use crate::errors::{PlatformApiError, PlatformResult};
use crate::models::{
    utc_now, DatasetRecord, RequestContext, DATASET_STATUS_INITIALIZED, DATASET_STATUS_PUBLISHED,
    DATASET_STATUS_PUBLISH_FAILED, DATASET_STATUS_UPLOADED, DATASET_STATUS_VALIDATED,
};
use crate::store::StateStore;

/// Transitions datasets through the publish lifecycle.
pub struct DatasetService {
    store: Arc<StateStore>,
    bridge: Arc<dyn DataBridgeAdapter>,
}

impl DatasetService {
    pub fn new(store: Arc<StateStore>, bridge: Arc<dyn DataBridgeAdapter>) -> Self {
        Self { store, bridge }
    }

    pub fn init_upload(
        &self,
        filename: &str,
        size_bytes: u64,
        context: &RequestContext,
    ) -> DatasetRecord {
        let now = utc_now();
        let dataset = DatasetRecord {
            id: self.store.next_id("dataset"),
            filename: filename.to_string(),
            size_bytes,
            status: DATASET_STATUS_INITIALIZED.to_string(),
            provider_data_id: None,
            created_at: now.clone(),
            updated_at: now,
            tenant_id: context.tenant_id.clone(),
            user_id: context.user_id.clone(),
        };
        self.store
            .datasets
            .write()
            .insert(dataset.id.clone(), dataset.clone());
        dataset
    }

    /// Mark an upload complete; the dataset moves through `uploaded` into
    /// `validated` and becomes eligible for publishing.
    pub fn complete_upload(
        &self,
        dataset_id: &str,
        context: &RequestContext,
    ) -> PlatformResult<DatasetRecord> {
        let mut datasets = self.store.datasets.write();
        let dataset = datasets
            .get_mut(dataset_id)
            .filter(|dataset| dataset.tenant_id == context.tenant_id)
            .ok_or_else(|| not_found(dataset_id, context))?;
        if dataset.status == DATASET_STATUS_INITIALIZED {
            dataset.status = DATASET_STATUS_UPLOADED.to_string();
        }
        if dataset.status == DATASET_STATUS_UPLOADED {
            dataset.status = DATASET_STATUS_VALIDATED.to_string();
        }
        dataset.updated_at = utc_now();
        Ok(dataset.clone())
    }

    /// Publish a dataset to the provider. A publish failure transitions the
    /// dataset to `publish_failed` and propagates the adapter error unchanged.
    pub async fn publish(
        &self,
        dataset_id: &str,
        mode: &str,
        context: &RequestContext,
    ) -> PlatformResult<DatasetRecord> {
        // Scope check before the provider call.
        self.get(dataset_id, context)?;

        match self
            .bridge
            .ensure_published(dataset_id, mode, &context.tenant_id, &context.user_id)
            .await
        {
            Ok(provider_data_id) => {
                let mut datasets = self.store.datasets.write();
                let dataset = datasets
                    .get_mut(dataset_id)
                    .ok_or_else(|| not_found(dataset_id, context))?;
                dataset.status = DATASET_STATUS_PUBLISHED.to_string();
                dataset.provider_data_id = Some(provider_data_id);
                dataset.updated_at = utc_now();
                Ok(dataset.clone())
            }
            Err(err) => {
                {
                    let mut datasets = self.store.datasets.write();
                    if let Some(dataset) = datasets.get_mut(dataset_id) {
                        dataset.status = DATASET_STATUS_PUBLISH_FAILED.to_string();
                        dataset.updated_at = utc_now();
                    }
                }
                Err(PlatformApiError::from_adapter(err, &context.request_id))
            }
        }
    }

    pub fn get(
        &self,
        dataset_id: &str,
        context: &RequestContext,
    ) -> PlatformResult<DatasetRecord> {
        self.store
            .datasets
            .read()
            .get(dataset_id)
            .filter(|dataset| dataset.tenant_id == context.tenant_id)
            .cloned()
            .ok_or_else(|| not_found(dataset_id, context))
    }
}

fn not_found(dataset_id: &str, context: &RequestContext) -> PlatformApiError {
    PlatformApiError::new(
        404,
        "DATASET_NOT_FOUND",
        format!("Dataset {dataset_id} not found."),
        &context.request_id,
    )
}
