//! Domain types for the dormant state store.
//!
//! These types represent the persisted state of worlds, their DNS records,
//! utilization samples, and scaling history. All types are serializable
//! to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

pub use dormant_core::StepScalingPolicy;
use dormant_core::{
    PLACEHOLDER_ADDRESS, WorldConfig, WorldId, WorldTopology, ZoneId, normalize_record_name,
};

// ── World ─────────────────────────────────────────────────────────

/// A managed game world and its only mutable scheduling state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldRecord {
    pub id: WorldId,
    pub cluster: String,
    pub service: String,
    pub task_family: String,
    pub volume: VolumeBinding,
    /// Target number of running instances, 0 or 1.
    pub desired_count: u32,
    /// Incremented on every desired-count change.
    pub revision: u64,
    /// Last public address reported by the running instance.
    pub public_address: Option<String>,
    pub dns: DnsBinding,
    pub scaling: StepScalingPolicy,
    /// Unix timestamp (seconds) when this world was provisioned.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last desired-count change.
    pub updated_at: u64,
}

/// Reference to the world's persistent volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeBinding {
    pub access_point_path: String,
    pub uid: u32,
    pub gid: u32,
}

/// The DNS record a world's address is published under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DnsBinding {
    pub zone_id: ZoneId,
    pub record_name: String,
    pub ttl: u32,
}

impl WorldRecord {
    /// Build the initial record for a freshly planned world (scaled to zero).
    pub fn from_plan(config: &WorldConfig, plan: &WorldTopology, now: u64) -> Self {
        Self {
            id: plan.world_id.clone(),
            cluster: plan.cluster.name.clone(),
            service: plan.compute.service.clone(),
            task_family: plan.compute.task_family.clone(),
            volume: VolumeBinding {
                access_point_path: plan.volume.access_point_path.clone(),
                uid: plan.volume.owner_uid,
                gid: plan.volume.owner_gid,
            },
            desired_count: plan.compute.initial_count,
            revision: 0,
            public_address: None,
            dns: DnsBinding {
                zone_id: config.dns.zone_id.clone(),
                record_name: config.dns.record_name.clone(),
                ttl: config.dns_ttl(),
            },
            scaling: plan.scaling.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the world currently wants a running instance.
    pub fn is_running(&self) -> bool {
        self.desired_count > 0
    }
}

/// Outcome of a desired-count write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesiredCountChange {
    pub world_id: WorldId,
    pub previous: u32,
    pub current: u32,
    pub revision: u64,
    /// False when the write matched the stored value and was skipped.
    pub changed: bool,
}

// ── DNS ───────────────────────────────────────────────────────────

/// A single address record in a hosted zone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DnsRecordEntry {
    pub zone_id: ZoneId,
    pub name: String,
    pub address: String,
    pub ttl: u32,
    /// Incremented on every content change.
    pub revision: u64,
    pub updated_at: u64,
}

impl DnsRecordEntry {
    /// The record created at provisioning time, before any launch.
    pub fn placeholder(binding: &DnsBinding, now: u64) -> Self {
        Self {
            zone_id: binding.zone_id.clone(),
            name: normalize_record_name(&binding.record_name),
            address: PLACEHOLDER_ADDRESS.to_string(),
            ttl: binding.ttl,
            revision: 0,
            updated_at: now,
        }
    }

    /// Build the composite key for the DNS table.
    pub fn table_key(&self) -> String {
        dns_key(&self.zone_id, &self.name)
    }

    pub fn is_placeholder(&self) -> bool {
        self.address == PLACEHOLDER_ADDRESS
    }
}

/// Outcome of a DNS upsert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DnsChange {
    pub record: DnsRecordEntry,
    pub changed: bool,
}

/// Composite key for a record in a zone.
pub fn dns_key(zone_id: &str, name: &str) -> String {
    format!("{zone_id}/{}", normalize_record_name(name))
}

// ── Metrics ───────────────────────────────────────────────────────

/// One utilization sample from a running instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub world_id: WorldId,
    /// Unix timestamp (seconds) the sample was taken.
    pub epoch: u64,
    /// Utilization in percent (0–100).
    pub utilization: f64,
}

impl MetricSample {
    /// Build the composite key for the metrics table.
    ///
    /// The epoch is zero-padded so lexical order matches time order; `seq`
    /// separates samples taken within the same second.
    pub fn table_key(&self, seq: u32) -> String {
        format!("{}:{:020}:{:06}", self.world_id, self.epoch, seq)
    }
}

// ── Scale events ──────────────────────────────────────────────────

/// A recorded desired-count change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScaleEvent {
    pub world_id: WorldId,
    pub epoch: u64,
    /// Principal that issued the change.
    pub actor: String,
    pub from: u32,
    pub to: u32,
    pub revision: u64,
}

impl ScaleEvent {
    /// Build the composite key for the scale events table.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.world_id, self.revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_key_normalizes_name() {
        assert_eq!(dns_key("Z1", "Hamlet.Link."), "Z1/hamlet.link");
    }

    #[test]
    fn placeholder_name_is_normalized() {
        let binding = DnsBinding {
            zone_id: "Z1".to_string(),
            record_name: "Sat.Example.COM.".to_string(),
            ttl: 30,
        };
        let record = DnsRecordEntry::placeholder(&binding, 0);
        assert_eq!(record.name, "sat.example.com");
        assert_eq!(record.table_key(), "Z1/sat.example.com");
    }

    #[test]
    fn metric_keys_sort_by_time() {
        let early = MetricSample {
            world_id: "w".to_string(),
            epoch: 999,
            utilization: 1.0,
        };
        let late = MetricSample {
            epoch: 1000,
            ..early.clone()
        };
        assert!(early.table_key(0) < late.table_key(0));
        assert!(early.table_key(0) < early.table_key(1));
        assert!(early.table_key(999) < late.table_key(0));
    }
}
