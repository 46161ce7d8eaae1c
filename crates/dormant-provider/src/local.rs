//! Reference provider backed by the embedded state store.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use dormant_core::epoch_secs;
use dormant_iam::Principal;
use dormant_state::{
    DesiredCountChange, DnsChange, DnsRecordEntry, MetricSample, ScaleEvent, StateStore,
    WorldRecord,
};

use crate::error::{ProviderError, ProviderResult};
use crate::traits::{DnsZone, ServiceScheduler};

/// Scheduler and DNS zone over a [`StateStore`], acting as one principal.
///
/// The principal is only recorded in the scale event log. Permission checks
/// are layered on top with [`GuardedScheduler`](crate::GuardedScheduler).
#[derive(Clone)]
pub struct LocalProvider {
    store: StateStore,
    actor: Principal,
    retention: Option<Duration>,
}

impl LocalProvider {
    pub fn new(store: StateStore, actor: Principal) -> Self {
        Self {
            store,
            actor,
            retention: None,
        }
    }

    /// Keep samples for `retention` instead of the world's evaluation window.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    fn world(&self, world_id: &str) -> ProviderResult<WorldRecord> {
        self.store
            .get_world(world_id)?
            .ok_or_else(|| ProviderError::NotFound(format!("world {world_id}")))
    }

    fn log_change(&self, change: &DesiredCountChange) {
        if change.changed {
            info!(
                world = %change.world_id,
                actor = %self.actor,
                from = change.previous,
                to = change.current,
                revision = change.revision,
                "desired count updated"
            );
        }
    }
}

#[async_trait]
impl ServiceScheduler for LocalProvider {
    async fn list_worlds(&self) -> ProviderResult<Vec<WorldRecord>> {
        Ok(self.store.list_worlds()?)
    }

    async fn describe(&self, world_id: &str) -> ProviderResult<WorldRecord> {
        self.world(world_id)
    }

    async fn set_desired_count(
        &self,
        world_id: &str,
        count: u32,
    ) -> ProviderResult<DesiredCountChange> {
        let change =
            self.store
                .set_desired_count(world_id, count, self.actor.as_str(), epoch_secs())?;
        self.log_change(&change);
        Ok(change)
    }

    async fn compare_and_set_desired_count(
        &self,
        world_id: &str,
        expected_revision: u64,
        count: u32,
    ) -> ProviderResult<DesiredCountChange> {
        let change = self.store.compare_and_set_desired_count(
            world_id,
            expected_revision,
            count,
            self.actor.as_str(),
            epoch_secs(),
        )?;
        self.log_change(&change);
        Ok(change)
    }

    async fn put_sample(&self, world_id: &str, utilization: f64, epoch: u64) -> ProviderResult<()> {
        if !utilization.is_finite() || !(0.0..=100.0).contains(&utilization) {
            return Err(ProviderError::Invalid(format!(
                "utilization {utilization} outside 0..=100"
            )));
        }
        let world = self.world(world_id)?;
        let retention = self.retention.map(|d| d.as_secs()).unwrap_or_else(|| {
            world.scaling.window_secs() + world.scaling.period_secs
        });
        let sample = MetricSample {
            world_id: world_id.to_string(),
            epoch,
            utilization,
        };
        self.store
            .put_sample(&sample, epoch_secs().saturating_sub(retention))?;
        Ok(())
    }

    async fn recent_samples(&self, world_id: &str, since: u64) -> ProviderResult<Vec<MetricSample>> {
        Ok(self.store.list_samples_since(world_id, since)?)
    }

    async fn scale_events(&self, world_id: &str, limit: usize) -> ProviderResult<Vec<ScaleEvent>> {
        Ok(self.store.list_scale_events(world_id, limit)?)
    }
}

#[async_trait]
impl DnsZone for LocalProvider {
    async fn get_record(&self, zone_id: &str, name: &str) -> ProviderResult<Option<DnsRecordEntry>> {
        Ok(self.store.get_dns_record(zone_id, name)?)
    }

    async fn upsert_record(
        &self,
        zone_id: &str,
        name: &str,
        address: &str,
        ttl: u32,
    ) -> ProviderResult<DnsChange> {
        if address.parse::<std::net::IpAddr>().is_err() {
            return Err(ProviderError::Invalid(format!("not an IP address: {address}")));
        }
        let change = self
            .store
            .upsert_dns_record(zone_id, name, address, ttl, epoch_secs())?;
        if change.changed {
            info!(zone = %zone_id, %name, %address, actor = %self.actor, "dns record updated");
        }
        Ok(change)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dormant_state::{DnsBinding, StepScalingPolicy, VolumeBinding};

    pub(crate) fn seeded_store(ids: &[(&str, &str)]) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        for (id, zone) in ids {
            store.provision_world(&test_world(id, zone)).unwrap();
        }
        store
    }

    pub(crate) fn test_world(id: &str, zone: &str) -> WorldRecord {
        WorldRecord {
            id: id.to_string(),
            cluster: format!("{id}-cluster"),
            service: format!("{id}-service"),
            task_family: id.to_string(),
            volume: VolumeBinding {
                access_point_path: format!("/{id}"),
                uid: 1000,
                gid: 1000,
            },
            desired_count: 0,
            revision: 0,
            public_address: None,
            dns: DnsBinding {
                zone_id: zone.to_string(),
                record_name: format!("{id}.example.com"),
                ttl: 30,
            },
            scaling: StepScalingPolicy::default(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn launcher_scale_up_is_idempotent() {
        let provider = LocalProvider::new(seeded_store(&[("sat", "Z1")]), Principal::launcher());

        let first = provider.set_desired_count("sat", 1).await.unwrap();
        assert!(first.changed);
        for _ in 0..3 {
            let again = provider.set_desired_count("sat", 1).await.unwrap();
            assert!(!again.changed);
            assert_eq!(again.current, 1);
        }
        assert_eq!(provider.describe("sat").await.unwrap().desired_count, 1);

        let events = provider.scale_events("sat", 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].actor, "launcher");
    }

    #[tokio::test]
    async fn concurrent_scale_ups_yield_one() {
        let provider = LocalProvider::new(seeded_store(&[("sat", "Z1")]), Principal::launcher());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let p = provider.clone();
            handles.push(tokio::spawn(async move { p.set_desired_count("sat", 1).await }));
        }
        let mut changed = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().changed {
                changed += 1;
            }
        }
        assert_eq!(changed, 1);
        assert_eq!(provider.describe("sat").await.unwrap().desired_count, 1);
    }

    #[tokio::test]
    async fn rejects_out_of_range_utilization() {
        let provider = LocalProvider::new(seeded_store(&[("sat", "Z1")]), Principal::watchdog("sat"));
        let err = provider.put_sample("sat", 140.0, epoch_secs()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Invalid(_)));
        let err = provider.put_sample("sat", f64::NAN, epoch_secs()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Invalid(_)));
    }

    #[tokio::test]
    async fn rejects_non_ip_record() {
        let provider = LocalProvider::new(seeded_store(&[("sat", "Z1")]), Principal::watchdog("sat"));
        let err = provider
            .upsert_record("Z1", "sat.example.com", "not-an-ip", 30)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Invalid(_)));
    }

    #[tokio::test]
    async fn unknown_world_is_not_found() {
        let provider = LocalProvider::new(seeded_store(&[]), Principal::launcher());
        let err = provider.set_desired_count("ghost", 1).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }
}
