//! Provider capabilities used by the lifecycle actors.

use async_trait::async_trait;

use dormant_state::{
    DesiredCountChange, DnsChange, DnsRecordEntry, MetricSample, ScaleEvent, WorldRecord,
};

use crate::error::ProviderResult;

/// Container scheduler: the durable desired-count counter plus its metrics.
#[async_trait]
pub trait ServiceScheduler: Send + Sync {
    /// Worlds visible to the caller.
    async fn list_worlds(&self) -> ProviderResult<Vec<WorldRecord>>;

    async fn describe(&self, world_id: &str) -> ProviderResult<WorldRecord>;

    /// Unconditional write; the last writer wins. Writing the current value
    /// is a no-op.
    async fn set_desired_count(&self, world_id: &str, count: u32)
    -> ProviderResult<DesiredCountChange>;

    /// Write only if the world's revision is still `expected_revision`.
    /// Fails with [`ProviderError::Conflict`](crate::ProviderError::Conflict)
    /// otherwise.
    async fn compare_and_set_desired_count(
        &self,
        world_id: &str,
        expected_revision: u64,
        count: u32,
    ) -> ProviderResult<DesiredCountChange>;

    async fn put_sample(&self, world_id: &str, utilization: f64, epoch: u64) -> ProviderResult<()>;

    /// Samples taken at or after `since`, oldest first.
    async fn recent_samples(&self, world_id: &str, since: u64) -> ProviderResult<Vec<MetricSample>>;

    /// Desired-count history, newest first.
    async fn scale_events(&self, world_id: &str, limit: usize) -> ProviderResult<Vec<ScaleEvent>>;
}

/// Hosted DNS zone holding one address record per world.
#[async_trait]
pub trait DnsZone: Send + Sync {
    async fn get_record(&self, zone_id: &str, name: &str) -> ProviderResult<Option<DnsRecordEntry>>;

    /// Create or replace a record. Writing identical content is a no-op.
    async fn upsert_record(
        &self,
        zone_id: &str,
        name: &str,
        address: &str,
        ttl: u32,
    ) -> ProviderResult<DnsChange>;
}
