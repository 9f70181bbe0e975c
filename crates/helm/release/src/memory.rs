//! In-memory release store
//!
//! Implements the desired-state store, dependency lookup and chart source
//! over shared maps. Used for single-instance deployments and tests.

use crate::chart::{ChartSource, ChartSourceError};
use crate::store::{DependencyLookup, DesiredStateStore, StoreError, StoredRelease};
use async_trait::async_trait;
use helm_types::{
    Artifact, ConditionSet, HelmChart, ReconcileStatus, ReleaseDesired, ReleaseIdentity,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryReleaseStore {
    releases: RwLock<HashMap<ReleaseIdentity, StoredRelease>>,
    charts: RwLock<HashMap<(String, String), HelmChart>>,
}

impl InMemoryReleaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the desired state of a release, keeping its status
    pub async fn apply(&self, desired: ReleaseDesired) -> u64 {
        let mut releases = self.releases.write().await;
        let identity = desired.identity.clone();
        match releases.get_mut(&identity) {
            Some(stored) => {
                stored.desired = desired;
                stored.resource_version += 1;
                stored.resource_version
            }
            None => {
                releases.insert(
                    identity,
                    StoredRelease {
                        desired,
                        status: ReconcileStatus::default(),
                        resource_version: 1,
                    },
                );
                1
            }
        }
    }

    /// Overwrite a release status regardless of its version
    pub async fn force_status(
        &self,
        identity: &ReleaseIdentity,
        status: ReconcileStatus,
    ) -> Result<u64, StoreError> {
        let mut releases = self.releases.write().await;
        let stored = releases
            .get_mut(identity)
            .ok_or_else(|| StoreError::NotFound(identity.clone()))?;
        stored.status = status;
        stored.resource_version += 1;
        Ok(stored.resource_version)
    }

    pub async fn status(&self, identity: &ReleaseIdentity) -> Option<ReconcileStatus> {
        self.releases.read().await.get(identity).map(|s| s.status.clone())
    }

    /// Drop the resource, as when its finalizer has completed
    pub async fn remove(&self, identity: &ReleaseIdentity) -> Option<StoredRelease> {
        self.releases.write().await.remove(identity)
    }

    /// Publish an artifact for a chart descriptor, as a source controller would
    pub async fn publish_artifact(
        &self,
        namespace: &str,
        name: &str,
        artifact: Artifact,
    ) -> Result<(), ChartSourceError> {
        let mut charts = self.charts.write().await;
        let chart = charts
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| ChartSourceError::NotFound(format!("{}/{}", namespace, name)))?;
        chart.artifact = Some(artifact);
        Ok(())
    }
}

#[async_trait]
impl DesiredStateStore for InMemoryReleaseStore {
    async fn get(&self, identity: &ReleaseIdentity) -> Result<Option<StoredRelease>, StoreError> {
        Ok(self.releases.read().await.get(identity).cloned())
    }

    async fn update_status(
        &self,
        identity: &ReleaseIdentity,
        status: &ReconcileStatus,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let mut releases = self.releases.write().await;
        let stored = releases
            .get_mut(identity)
            .ok_or_else(|| StoreError::NotFound(identity.clone()))?;

        if stored.resource_version != expected_version {
            return Err(StoreError::Conflict {
                identity: identity.clone(),
                expected: expected_version,
                actual: stored.resource_version,
            });
        }

        stored.status = status.clone();
        stored.resource_version += 1;
        Ok(stored.resource_version)
    }
}

#[async_trait]
impl DependencyLookup for InMemoryReleaseStore {
    async fn conditions(
        &self,
        identity: &ReleaseIdentity,
    ) -> Result<Option<ConditionSet>, StoreError> {
        Ok(self
            .releases
            .read()
            .await
            .get(identity)
            .map(|s| s.status.conditions.clone()))
    }
}

#[async_trait]
impl ChartSource for InMemoryReleaseStore {
    async fn get_chart(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HelmChart>, ChartSourceError> {
        Ok(self
            .charts
            .read()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_chart(&self, chart: HelmChart) -> Result<(), ChartSourceError> {
        let mut charts = self.charts.write().await;
        let key = (chart.namespace.clone(), chart.name.clone());
        if charts.contains_key(&key) {
            return Err(ChartSourceError::AlreadyExists(format!("{}/{}", key.0, key.1)));
        }
        charts.insert(key, chart);
        Ok(())
    }

    async fn update_chart(&self, chart: HelmChart) -> Result<(), ChartSourceError> {
        let mut charts = self.charts.write().await;
        let key = (chart.namespace.clone(), chart.name.clone());
        match charts.get_mut(&key) {
            Some(existing) => {
                *existing = chart;
                Ok(())
            }
            None => Err(ChartSourceError::NotFound(format!("{}/{}", key.0, key.1))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helm_types::{ChartTemplate, SourceReference};

    fn desired() -> ReleaseDesired {
        ReleaseDesired::new(
            ReleaseIdentity::new("apps", "web"),
            ChartTemplate::new("web", "*", SourceReference::repository("charts")),
        )
    }

    #[tokio::test]
    async fn test_update_status_enforces_version() {
        let store = InMemoryReleaseStore::new();
        let version = store.apply(desired()).await;
        let identity = ReleaseIdentity::new("apps", "web");

        let mut status = ReconcileStatus::default();
        status.failures = 1;
        let next = store.update_status(&identity, &status, version).await.unwrap();
        assert_eq!(next, version + 1);

        let err = store.update_status(&identity, &status, version).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict { expected, actual, .. } if expected == version && actual == next
        ));
    }

    #[tokio::test]
    async fn test_apply_keeps_status() {
        let store = InMemoryReleaseStore::new();
        let identity = ReleaseIdentity::new("apps", "web");
        store.apply(desired()).await;

        let mut status = ReconcileStatus::default();
        status.last_released_revision = 2;
        store.force_status(&identity, status).await.unwrap();

        let mut changed = desired();
        changed.suspend = true;
        store.apply(changed).await;

        let stored = store.get(&identity).await.unwrap().unwrap();
        assert!(stored.desired.suspend);
        assert_eq!(stored.status.last_released_revision, 2);
    }

    #[tokio::test]
    async fn test_missing_dependency_is_none() {
        let store = InMemoryReleaseStore::new();
        let lookup = store
            .conditions(&ReleaseIdentity::new("apps", "db"))
            .await
            .unwrap();
        assert!(lookup.is_none());
    }
}
