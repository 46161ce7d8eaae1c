//! redb table definitions for the dormant state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// World records keyed by `{world_id}`.
pub const WORLDS: TableDefinition<&str, &[u8]> = TableDefinition::new("worlds");

/// DNS records keyed by `{zone_id}/{record_name}`.
pub const DNS_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("dns_records");

/// Utilization samples keyed by `{world_id}:{epoch:020}`.
pub const METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("metrics");

/// Desired-count changes keyed by `{world_id}:{revision:020}`.
pub const SCALE_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("scale_events");
