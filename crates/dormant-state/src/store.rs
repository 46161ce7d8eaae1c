//! StateStore: redb-backed world state.
//!
//! Provides typed operations over worlds, DNS records, metric samples, and
//! scale events. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use dormant_core::{MAX_DESIRED_COUNT, normalize_record_name};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(WORLDS).map_err(map_err!(Table))?;
        txn.open_table(DNS_RECORDS).map_err(map_err!(Table))?;
        txn.open_table(METRICS).map_err(map_err!(Table))?;
        txn.open_table(SCALE_EVENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Worlds ─────────────────────────────────────────────────────

    /// Provision a world, creating its placeholder DNS record.
    ///
    /// Re-provisioning an existing world refreshes its static fields but
    /// keeps the desired count, revision, and last known address. Returns
    /// true if the world was newly created.
    pub fn provision_world(&self, record: &WorldRecord) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let created;
        {
            let mut worlds = txn.open_table(WORLDS).map_err(map_err!(Table))?;
            let existing = worlds
                .get(record.id.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());

            created = existing.is_none();
            let merged = match existing {
                Some(raw) => {
                    let current: WorldRecord =
                        serde_json::from_slice(&raw).map_err(map_err!(Deserialize))?;
                    WorldRecord {
                        desired_count: current.desired_count,
                        revision: current.revision,
                        public_address: current.public_address,
                        created_at: current.created_at,
                        updated_at: current.updated_at,
                        ..record.clone()
                    }
                }
                None => record.clone(),
            };
            let value = serde_json::to_vec(&merged).map_err(map_err!(Serialize))?;
            worlds
                .insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let placeholder = DnsRecordEntry::placeholder(&record.dns, record.created_at);
            let key = placeholder.table_key();
            let mut dns = txn.open_table(DNS_RECORDS).map_err(map_err!(Table))?;
            let has_record = dns.get(key.as_str()).map_err(map_err!(Read))?.is_some();
            if !has_record {
                let value = serde_json::to_vec(&placeholder).map_err(map_err!(Serialize))?;
                dns.insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(world = %record.id, created, "world provisioned");
        Ok(created)
    }

    /// Get a world by id.
    pub fn get_world(&self, world_id: &str) -> StateResult<Option<WorldRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORLDS).map_err(map_err!(Table))?;
        match table.get(world_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let world: WorldRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(world))
            }
            None => Ok(None),
        }
    }

    /// List all worlds.
    pub fn list_worlds(&self) -> StateResult<Vec<WorldRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORLDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let world: WorldRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(world);
        }
        Ok(results)
    }

    /// Deprovision a world with its DNS record, samples, and history.
    ///
    /// Returns true if it existed.
    pub fn delete_world(&self, world_id: &str) -> StateResult<bool> {
        let Some(world) = self.get_world(world_id)? else {
            return Ok(false);
        };
        let prefix = format!("{world_id}:");

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut worlds = txn.open_table(WORLDS).map_err(map_err!(Table))?;
            worlds.remove(world_id).map_err(map_err!(Write))?;

            let mut dns = txn.open_table(DNS_RECORDS).map_err(map_err!(Table))?;
            let key = dns_key(&world.dns.zone_id, &world.dns.record_name);
            dns.remove(key.as_str()).map_err(map_err!(Write))?;

            for table_def in [METRICS, SCALE_EVENTS] {
                let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
                let keys = keys_with_prefix(&table, &prefix)?;
                for key in &keys {
                    table.remove(key.as_str()).map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(world = %world_id, "world deleted");
        Ok(true)
    }

    // ── Desired count ──────────────────────────────────────────────

    /// Set a world's desired count unconditionally (last write wins).
    pub fn set_desired_count(
        &self,
        world_id: &str,
        count: u32,
        actor: &str,
        now: u64,
    ) -> StateResult<DesiredCountChange> {
        self.write_desired_count(world_id, None, count, actor, now)
    }

    /// Set a world's desired count only if its revision still matches.
    pub fn compare_and_set_desired_count(
        &self,
        world_id: &str,
        expected_revision: u64,
        count: u32,
        actor: &str,
        now: u64,
    ) -> StateResult<DesiredCountChange> {
        self.write_desired_count(world_id, Some(expected_revision), count, actor, now)
    }

    fn write_desired_count(
        &self,
        world_id: &str,
        expected_revision: Option<u64>,
        count: u32,
        actor: &str,
        now: u64,
    ) -> StateResult<DesiredCountChange> {
        if count > MAX_DESIRED_COUNT {
            return Err(StateError::InvalidDesiredCount(count));
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let change;
        {
            let mut worlds = txn.open_table(WORLDS).map_err(map_err!(Table))?;
            let raw = worlds
                .get(world_id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| StateError::NotFound(world_id.to_string()))?;
            let mut world: WorldRecord =
                serde_json::from_slice(&raw).map_err(map_err!(Deserialize))?;

            if let Some(expected) = expected_revision
                && expected != world.revision
            {
                return Err(StateError::RevisionConflict {
                    world: world_id.to_string(),
                    expected,
                    actual: world.revision,
                });
            }

            let previous = world.desired_count;
            if previous == count {
                change = DesiredCountChange {
                    world_id: world_id.to_string(),
                    previous,
                    current: count,
                    revision: world.revision,
                    changed: false,
                };
            } else {
                world.desired_count = count;
                world.revision += 1;
                world.updated_at = now;
                if count == 0 {
                    world.public_address = None;
                }
                let value = serde_json::to_vec(&world).map_err(map_err!(Serialize))?;
                worlds
                    .insert(world_id, value.as_slice())
                    .map_err(map_err!(Write))?;

                let event = ScaleEvent {
                    world_id: world_id.to_string(),
                    epoch: now,
                    actor: actor.to_string(),
                    from: previous,
                    to: count,
                    revision: world.revision,
                };
                let mut events = txn.open_table(SCALE_EVENTS).map_err(map_err!(Table))?;
                let value = serde_json::to_vec(&event).map_err(map_err!(Serialize))?;
                events
                    .insert(event.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;

                change = DesiredCountChange {
                    world_id: world_id.to_string(),
                    previous,
                    current: count,
                    revision: world.revision,
                    changed: true,
                };
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if change.changed {
            debug!(world = %world_id, %actor, from = change.previous, to = count, "desired count changed");
        }
        Ok(change)
    }

    /// Record the public address the running instance reported.
    ///
    /// Returns true if the stored address changed.
    pub fn set_public_address(&self, world_id: &str, address: Option<&str>) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let changed;
        {
            let mut worlds = txn.open_table(WORLDS).map_err(map_err!(Table))?;
            let raw = worlds
                .get(world_id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| StateError::NotFound(world_id.to_string()))?;
            let mut world: WorldRecord =
                serde_json::from_slice(&raw).map_err(map_err!(Deserialize))?;

            changed = world.public_address.as_deref() != address;
            if changed {
                world.public_address = address.map(str::to_string);
                let value = serde_json::to_vec(&world).map_err(map_err!(Serialize))?;
                worlds
                    .insert(world_id, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(changed)
    }

    // ── DNS ────────────────────────────────────────────────────────

    /// Insert or update an address record.
    ///
    /// Writing the address and TTL the record already holds leaves it
    /// untouched (same revision, same timestamp).
    pub fn upsert_dns_record(
        &self,
        zone_id: &str,
        name: &str,
        address: &str,
        ttl: u32,
        now: u64,
    ) -> StateResult<DnsChange> {
        let key = dns_key(zone_id, name);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let change;
        {
            let mut table = txn.open_table(DNS_RECORDS).map_err(map_err!(Table))?;
            let existing = table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let existing: Option<DnsRecordEntry> = match existing {
                Some(raw) => Some(serde_json::from_slice(&raw).map_err(map_err!(Deserialize))?),
                None => None,
            };

            change = match existing {
                Some(record) if record.address == address && record.ttl == ttl => DnsChange {
                    record,
                    changed: false,
                },
                existing => {
                    let record = DnsRecordEntry {
                        zone_id: zone_id.to_string(),
                        name: normalize_record_name(name),
                        address: address.to_string(),
                        ttl,
                        revision: existing.map(|r| r.revision + 1).unwrap_or(0),
                        updated_at: now,
                    };
                    let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    DnsChange {
                        record,
                        changed: true,
                    }
                }
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if change.changed {
            debug!(%key, %address, "dns record updated");
        }
        Ok(change)
    }

    /// Get a record by zone and name.
    pub fn get_dns_record(&self, zone_id: &str, name: &str) -> StateResult<Option<DnsRecordEntry>> {
        let key = dns_key(zone_id, name);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DNS_RECORDS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: DnsRecordEntry =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all records in a zone.
    pub fn list_dns_records(&self, zone_id: &str) -> StateResult<Vec<DnsRecordEntry>> {
        let prefix = format!("{zone_id}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DNS_RECORDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: DnsRecordEntry =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    // ── Metrics ────────────────────────────────────────────────────

    /// Store a utilization sample and prune samples older than `retain_since`.
    pub fn put_sample(&self, sample: &MetricSample, retain_since: u64) -> StateResult<()> {
        let value = serde_json::to_vec(sample).map_err(map_err!(Serialize))?;
        let start = format!("{}:", sample.world_id);
        let same_second = format!("{}:{:020}:", sample.world_id, sample.epoch);
        let same_second_end = format!("{}:{:020};", sample.world_id, sample.epoch);
        let cutoff = format!("{}:{:020}", sample.world_id, retain_since);

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let pruned;
        {
            let worlds = txn.open_table(WORLDS).map_err(map_err!(Table))?;
            if worlds
                .get(sample.world_id.as_str())
                .map_err(map_err!(Read))?
                .is_none()
            {
                return Err(StateError::NotFound(sample.world_id.clone()));
            }

            let mut table = txn.open_table(METRICS).map_err(map_err!(Table))?;
            let stale: Vec<String> = table
                .range(start.as_str()..cutoff.as_str())
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    Some(key.value().to_string())
                })
                .collect();
            for stale_key in &stale {
                table.remove(stale_key.as_str()).map_err(map_err!(Write))?;
            }
            pruned = stale.len();

            if sample.epoch >= retain_since {
                let seq = table
                    .range(same_second.as_str()..same_second_end.as_str())
                    .map_err(map_err!(Read))?
                    .count() as u32;
                let key = sample.table_key(seq);
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if pruned > 0 {
            debug!(world = %sample.world_id, pruned, "pruned expired samples");
        }
        Ok(())
    }

    /// Samples for a world taken at or after `since`, oldest first.
    pub fn list_samples_since(&self, world_id: &str, since: u64) -> StateResult<Vec<MetricSample>> {
        let start = format!("{world_id}:{since:020}");
        // ';' sorts directly after ':', bounding the scan to this world.
        let end = format!("{world_id};");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(METRICS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let sample: MetricSample =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(sample);
        }
        Ok(results)
    }

    // ── Scale events ───────────────────────────────────────────────

    /// Most recent desired-count changes for a world, newest first.
    pub fn list_scale_events(&self, world_id: &str, limit: usize) -> StateResult<Vec<ScaleEvent>> {
        let start = format!("{world_id}:");
        let end = format!("{world_id};");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCALE_EVENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
            .rev()
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let event: ScaleEvent =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(event);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }
}

/// Collect every key in `table` that starts with `prefix`.
fn keys_with_prefix<T: ReadableTable<&'static str, &'static [u8]>>(
    table: &T,
    prefix: &str,
) -> StateResult<Vec<String>> {
    let mut keys = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        let key = key.value();
        if key.starts_with(prefix) {
            keys.push(key.to_string());
        }
    }
    Ok(keys)
}
