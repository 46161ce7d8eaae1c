//! Permission enforcement around any provider backend.
//!
//! Every call is checked against the [`Policy`] for the wrapper's
//! principal before it reaches the inner backend.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use dormant_iam::{Action, Policy, Principal, ResourceScope, WorldScope};
use dormant_state::{
    DesiredCountChange, DnsChange, DnsRecordEntry, MetricSample, ScaleEvent, WorldRecord,
};

use crate::error::{ProviderError, ProviderResult};
use crate::traits::{DnsZone, ServiceScheduler};

/// Resources a persisted world maps onto.
pub fn world_scope(world: &WorldRecord) -> WorldScope {
    WorldScope {
        world_id: world.id.clone(),
        cluster: world.cluster.clone(),
        service: world.service.clone(),
        task_family: world.task_family.clone(),
        zone_id: world.dns.zone_id.clone(),
        record_name: world.dns.record_name.clone(),
    }
}

pub struct GuardedScheduler<S> {
    inner: S,
    policy: Arc<Policy>,
    principal: Principal,
}

impl<S: ServiceScheduler> GuardedScheduler<S> {
    pub fn new(inner: S, policy: Arc<Policy>, principal: Principal) -> Self {
        Self {
            inner,
            policy,
            principal,
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Look up a world for an authorization check.
    ///
    /// A missing world is reported as a denial so callers without a grant
    /// learn nothing about which worlds exist.
    async fn resolve(&self, world_id: &str, action: Action) -> ProviderResult<WorldRecord> {
        match self.inner.describe(world_id).await {
            Err(ProviderError::NotFound(_)) => {
                debug!(principal = %self.principal, %action, world = world_id, "access denied");
                Err(ProviderError::AccessDenied(format!(
                    "access denied: {} may not {action} on world {world_id}",
                    self.principal
                )))
            }
            other => other,
        }
    }

    /// Resolve the world and check `action` against its service.
    async fn check_service(&self, world_id: &str, action: Action) -> ProviderResult<WorldRecord> {
        let world = self.resolve(world_id, action).await?;
        self.policy
            .authorize(&self.principal, action, &world_scope(&world).service())?;
        Ok(world)
    }

    async fn check_task_family(&self, world_id: &str, action: Action) -> ProviderResult<()> {
        let world = self.resolve(world_id, action).await?;
        self.policy
            .authorize(&self.principal, action, &world_scope(&world).task_family())?;
        Ok(())
    }
}

#[async_trait]
impl<S: ServiceScheduler> ServiceScheduler for GuardedScheduler<S> {
    async fn list_worlds(&self) -> ProviderResult<Vec<WorldRecord>> {
        let worlds = self.inner.list_worlds().await?;
        Ok(worlds
            .into_iter()
            .filter(|w| {
                self.policy.is_allowed(
                    &self.principal,
                    Action::DescribeService,
                    &world_scope(w).service(),
                )
            })
            .collect())
    }

    async fn describe(&self, world_id: &str) -> ProviderResult<WorldRecord> {
        self.check_service(world_id, Action::DescribeService).await
    }

    async fn set_desired_count(
        &self,
        world_id: &str,
        count: u32,
    ) -> ProviderResult<DesiredCountChange> {
        self.check_service(world_id, Action::UpdateDesiredCount).await?;
        self.inner.set_desired_count(world_id, count).await
    }

    async fn compare_and_set_desired_count(
        &self,
        world_id: &str,
        expected_revision: u64,
        count: u32,
    ) -> ProviderResult<DesiredCountChange> {
        self.check_service(world_id, Action::UpdateDesiredCount).await?;
        self.inner
            .compare_and_set_desired_count(world_id, expected_revision, count)
            .await
    }

    async fn put_sample(&self, world_id: &str, utilization: f64, epoch: u64) -> ProviderResult<()> {
        self.check_task_family(world_id, Action::PutMetrics).await?;
        self.inner.put_sample(world_id, utilization, epoch).await
    }

    async fn recent_samples(&self, world_id: &str, since: u64) -> ProviderResult<Vec<MetricSample>> {
        self.check_task_family(world_id, Action::ReadMetrics).await?;
        self.inner.recent_samples(world_id, since).await
    }

    async fn scale_events(&self, world_id: &str, limit: usize) -> ProviderResult<Vec<ScaleEvent>> {
        self.check_service(world_id, Action::DescribeService).await?;
        self.inner.scale_events(world_id, limit).await
    }
}

pub struct GuardedDns<D> {
    inner: D,
    policy: Arc<Policy>,
    principal: Principal,
}

impl<D: DnsZone> GuardedDns<D> {
    pub fn new(inner: D, policy: Arc<Policy>, principal: Principal) -> Self {
        Self {
            inner,
            policy,
            principal,
        }
    }

    fn check_record(&self, zone_id: &str, name: &str, action: Action) -> ProviderResult<()> {
        let scope = ResourceScope::record(zone_id, name);
        self.policy.authorize(&self.principal, action, &scope)?;
        Ok(())
    }
}

#[async_trait]
impl<D: DnsZone> DnsZone for GuardedDns<D> {
    async fn get_record(&self, zone_id: &str, name: &str) -> ProviderResult<Option<DnsRecordEntry>> {
        self.check_record(zone_id, name, Action::ListRecords)?;
        self.inner.get_record(zone_id, name).await
    }

    async fn upsert_record(
        &self,
        zone_id: &str,
        name: &str,
        address: &str,
        ttl: u32,
    ) -> ProviderResult<DnsChange> {
        self.check_record(zone_id, name, Action::ChangeRecord)?;
        self.inner.upsert_record(zone_id, name, address, ttl).await
    }
}
