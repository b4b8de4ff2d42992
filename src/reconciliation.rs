//! Reconciliation Service
//! Mission: Converge platform state with provider state and record drift
//!
//! Snapshots are taken under the read lock, provider calls happen with no
//! lock held, and the write lock is re-acquired only to apply transitions.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::execution::ExecutionAdapter;
use crate::errors::PlatformResult;
use crate::knowledge::ingestion::KnowledgeIngestionPipeline;
use crate::lifecycle::{apply_deployment_transition, apply_order_transition};
use crate::models::{utc_now, DriftEventRecord};
use crate::store::StateStore;

/// Summary of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconciliationSummary {
    pub deployment_checks: usize,
    pub order_checks: usize,
    pub drift_count: usize,
}

/// Reconcile platform state with provider state and record drift events.
pub struct ReconciliationService {
    store: Arc<StateStore>,
    adapter: Arc<dyn ExecutionAdapter>,
    knowledge: KnowledgeIngestionPipeline,
}

impl ReconciliationService {
    pub fn new(store: Arc<StateStore>, adapter: Arc<dyn ExecutionAdapter>) -> Self {
        let knowledge = KnowledgeIngestionPipeline::new(store.clone());
        Self {
            store,
            adapter,
            knowledge,
        }
    }

    /// Reconcile this tenant's active deployments that carry a provider ref.
    pub async fn reconcile_deployments(
        &self,
        tenant_id: &str,
        user_id: &str,
        request_id: Option<&str>,
    ) -> PlatformResult<Vec<DriftEventRecord>> {
        let snapshots: Vec<(String, String, String, Option<f64>)> = self
            .store
            .deployments
            .read()
            .values()
            .filter(|deployment| deployment.tenant_id == tenant_id)
            .filter_map(|deployment| {
                deployment.provider_ref_id.as_ref().map(|provider_ref| {
                    (
                        deployment.id.clone(),
                        provider_ref.clone(),
                        deployment.status.clone(),
                        deployment.latest_pnl,
                    )
                })
            })
            .collect();

        let mut events = Vec::new();
        for (deployment_id, provider_ref, _, _) in snapshots {
            let provider = match self
                .adapter
                .get_deployment(&provider_ref, tenant_id, user_id)
                .await
            {
                Ok(provider) => provider,
                Err(err) => {
                    tracing::warn!(
                        deployment_id = %deployment_id,
                        provider_ref = %provider_ref,
                        code = %err.code,
                        "Skipping deployment reconciliation after provider failure"
                    );
                    continue;
                }
            };

            let changed = {
                let mut deployments = self.store.deployments.write();
                let Some(deployment) = deployments.get_mut(&deployment_id) else {
                    continue;
                };
                let next_status =
                    apply_deployment_transition(&deployment.status, Some(&provider.status));
                let pnl_changed = provider
                    .latest_pnl
                    .map(|pnl| deployment.latest_pnl != Some(pnl))
                    .unwrap_or(false);

                if next_status != deployment.status || pnl_changed {
                    let previous = deployment.status.clone();
                    deployment.status = next_status.clone();
                    if let Some(pnl) = provider.latest_pnl {
                        deployment.latest_pnl = Some(pnl);
                    }
                    deployment.updated_at = utc_now();
                    Some((previous, next_status, deployment.clone()))
                } else {
                    None
                }
            };

            if let Some((previous, next_status, deployment)) = changed {
                self.knowledge.ingest_deployment_outcome(&deployment);
                events.push(self.record_drift(
                    "deployment",
                    &deployment_id,
                    Some(&provider_ref),
                    &previous,
                    &provider.status,
                    &format!("mapped_to_{next_status}"),
                    tenant_id,
                    user_id,
                    request_id,
                    HashMap::from([("latestPnl".to_string(), json!(deployment.latest_pnl))]),
                ));
            }
        }
        Ok(events)
    }

    /// Reconcile this tenant's orders that carry a provider order id.
    pub async fn reconcile_orders(
        &self,
        tenant_id: &str,
        user_id: &str,
        request_id: Option<&str>,
    ) -> PlatformResult<Vec<DriftEventRecord>> {
        let snapshots: Vec<(String, String)> = self
            .store
            .orders
            .read()
            .values()
            .filter(|order| order.tenant_id == tenant_id)
            .filter_map(|order| {
                order
                    .provider_order_id
                    .as_ref()
                    .map(|provider_id| (order.id.clone(), provider_id.clone()))
            })
            .collect();

        let mut events = Vec::new();
        for (order_id, provider_order_id) in snapshots {
            let provider = match self
                .adapter
                .get_order(&provider_order_id, tenant_id, user_id)
                .await
            {
                Ok(Some(provider)) => provider,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(
                        order_id = %order_id,
                        code = %err.code,
                        "Skipping order reconciliation after provider failure"
                    );
                    continue;
                }
            };

            let changed = {
                let mut orders = self.store.orders.write();
                let Some(order) = orders.get_mut(&order_id) else {
                    continue;
                };
                let next_status = apply_order_transition(&order.status, Some(&provider.status));
                if next_status != order.status {
                    let previous = order.status.clone();
                    order.status = next_status.clone();
                    order.updated_at = utc_now();
                    Some((previous, next_status))
                } else {
                    None
                }
            };

            if let Some((previous, next_status)) = changed {
                events.push(self.record_drift(
                    "order",
                    &order_id,
                    Some(&provider_order_id),
                    &previous,
                    &provider.status,
                    &format!("synced_to_{next_status}"),
                    tenant_id,
                    user_id,
                    request_id,
                    HashMap::new(),
                ));
            }
        }
        Ok(events)
    }

    /// Full pass over both resource families.
    pub async fn run_drift_checks(
        &self,
        tenant_id: &str,
        user_id: &str,
        request_id: Option<&str>,
    ) -> PlatformResult<ReconciliationSummary> {
        let deployment_events = self
            .reconcile_deployments(tenant_id, user_id, request_id)
            .await?;
        let order_events = self.reconcile_orders(tenant_id, user_id, request_id).await?;
        Ok(ReconciliationSummary {
            deployment_checks: self.store.deployments.read().len(),
            order_checks: self.store.orders.read().len(),
            drift_count: deployment_events.len() + order_events.len(),
        })
    }

    /// Distinct `(tenant, user)` owners of reconcilable resources, for the
    /// background cadence.
    pub fn resource_owners(&self) -> Vec<(String, String)> {
        let mut owners: Vec<(String, String)> = self
            .store
            .deployments
            .read()
            .values()
            .map(|deployment| (deployment.tenant_id.clone(), deployment.user_id.clone()))
            .chain(
                self.store
                    .orders
                    .read()
                    .values()
                    .map(|order| (order.tenant_id.clone(), order.user_id.clone())),
            )
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }

    #[allow(clippy::too_many_arguments)]
    fn record_drift(
        &self,
        resource_type: &str,
        resource_id: &str,
        provider_ref_id: Option<&str>,
        previous_state: &str,
        provider_state: &str,
        resolution: &str,
        tenant_id: &str,
        user_id: &str,
        request_id: Option<&str>,
        extra: HashMap<String, Value>,
    ) -> DriftEventRecord {
        let mut metadata: HashMap<String, Value> = HashMap::from([
            ("tenantId".to_string(), json!(tenant_id)),
            ("userId".to_string(), json!(user_id)),
        ]);
        if let Some(request_id) = request_id {
            metadata.insert("requestId".to_string(), json!(request_id));
        }
        metadata.extend(extra);

        let event = DriftEventRecord {
            id: self.store.next_id("drift"),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            provider_ref_id: provider_ref_id.map(str::to_string),
            previous_state: previous_state.to_string(),
            provider_state: provider_state.to_string(),
            resolution: resolution.to_string(),
            metadata,
            created_at: utc_now(),
        };
        tracing::info!(
            resource_type,
            resource_id,
            previous_state,
            provider_state,
            resolution,
            tenant_id,
            "Drift detected and reconciled"
        );
        self.store.drift_events.write().push(event.clone());
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::execution::InMemoryExecutionAdapter;
    use crate::models::{DeploymentMode, OrderRecord};

    fn seeded() -> (ReconciliationService, Arc<StateStore>, Arc<InMemoryExecutionAdapter>) {
        let store = Arc::new(StateStore::new());
        let adapter = Arc::new(InMemoryExecutionAdapter::new());
        let service = ReconciliationService::new(store.clone(), adapter.clone());
        (service, store, adapter)
    }

    #[tokio::test]
    async fn test_provider_stop_converges_with_one_drift_event() {
        let (service, store, adapter) = seeded();
        adapter.set_deployment_state("live-dep-001", "stopped", None);
        // The seeded dep-001 is running; a stopped report converges it.
        {
            let mut deployments = store.deployments.write();
            deployments.get_mut("dep-001").unwrap().status = "stopping".to_string();
        }

        let events = service
            .reconcile_deployments("tenant-local", "user-local", Some("req-recon-001"))
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(store.deployments.read()["dep-001"].status, "stopped");
        assert_eq!(events[0].resolution, "mapped_to_stopped");
        assert_eq!(events[0].metadata["tenantId"], json!("tenant-local"));
        assert_eq!(events[0].metadata["requestId"], json!("req-recon-001"));

        // A second pass with unchanged provider state records nothing new.
        let events = service
            .reconcile_deployments("tenant-local", "user-local", None)
            .await
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(store.drift_events.read().len(), 1);
    }

    #[tokio::test]
    async fn test_pnl_change_alone_records_drift() {
        let (service, store, adapter) = seeded();
        adapter.set_deployment_state("live-dep-001", "running", Some(-250.0));

        let events = service
            .reconcile_deployments("tenant-local", "user-local", None)
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(
            store.deployments.read()["dep-001"].latest_pnl,
            Some(-250.0)
        );
        assert_eq!(events[0].metadata["latestPnl"], json!(-250.0));
    }

    #[tokio::test]
    async fn test_reconciliation_is_tenant_scoped() {
        let (service, store, adapter) = seeded();
        adapter.set_deployment_state("live-dep-001", "stopped", None);
        {
            let mut deployments = store.deployments.write();
            deployments.get_mut("dep-001").unwrap().status = "stopping".to_string();
        }

        let events = service
            .reconcile_deployments("tenant-other", "user-other", None)
            .await
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(store.deployments.read()["dep-001"].status, "stopping");
    }

    #[tokio::test]
    async fn test_order_reconciliation_syncs_status() {
        let (service, store, adapter) = seeded();
        let now = utc_now();
        store.orders.write().insert(
            "ord-0001".to_string(),
            OrderRecord {
                id: "ord-0001".to_string(),
                symbol: "BTCUSDT".to_string(),
                side: "buy".to_string(),
                order_type: "limit".to_string(),
                quantity: 0.1,
                price: Some(64_000.0),
                status: "pending".to_string(),
                deployment_id: Some("dep-001".to_string()),
                provider_order_id: Some("live-order-777".to_string()),
                created_at: now.clone(),
                updated_at: now,
                tenant_id: "tenant-local".to_string(),
                user_id: "user-local".to_string(),
            },
        );
        adapter.set_order_state("live-order-777", "filled");

        let events = service
            .reconcile_orders("tenant-local", "user-local", None)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].resolution, "synced_to_filled");
        assert_eq!(store.orders.read()["ord-0001"].status, "filled");
    }

    #[tokio::test]
    async fn test_deployment_without_provider_ref_is_skipped() {
        let (service, store, _) = seeded();
        {
            let mut deployments = store.deployments.write();
            deployments.get_mut("dep-001").unwrap().provider_ref_id = None;
        }
        let summary = service
            .run_drift_checks("tenant-local", "user-local", None)
            .await
            .unwrap();
        assert_eq!(summary.drift_count, 0);
    }

    #[test]
    fn test_resource_owners_deduplicates() {
        let (service, _, _) = seeded();
        let owners = service.resource_owners();
        assert_eq!(owners, vec![("tenant-local".to_string(), "user-local".to_string())]);
    }
}
