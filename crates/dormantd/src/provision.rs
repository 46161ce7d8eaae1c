//! Provision mode: validate the topology and persist every world.
//!
//! Worlds are created scaled to zero with a placeholder DNS record.
//! Re-running against an existing store keeps each world's scheduling
//! state and only refreshes its static description.

use std::path::Path;

use anyhow::Context;
use tracing::info;

use dormant_core::{DormantConfig, Topology, epoch_secs};
use dormant_state::{StateStore, WorldRecord};

pub fn run_provision(config_path: &Path, data_dir: &Path, dry_run: bool) -> anyhow::Result<()> {
    let config = DormantConfig::from_file(config_path)
        .with_context(|| format!("load {}", config_path.display()))?;
    let plans = Topology::plan_all(&config.worlds)?;
    info!(worlds = plans.len(), "topology validated");

    if dry_run {
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(());
    }

    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("dormant.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let now = epoch_secs();
    for (world, plan) in config.worlds.iter().zip(&plans) {
        let record = WorldRecord::from_plan(world, plan, now);
        let created = store.provision_world(&record)?;
        info!(
            world = %record.id,
            cluster = %record.cluster,
            service = %record.service,
            record = %record.dns.record_name,
            created,
            "world provisioned"
        );
    }

    Ok(())
}
