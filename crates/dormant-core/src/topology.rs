//! Resource topology: the durable resources behind each world.
//!
//! Planning is bootstrap-time only. `Topology::plan` validates a
//! `WorldConfig` and produces handles for its network, volume, cluster,
//! and compute unit. Nothing here changes after provisioning.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::WorldConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::scaling::StepScalingPolicy;
use crate::types::*;

const DEFAULT_CPU: u32 = 1024;
const DEFAULT_MEMORY_MIB: u32 = 2048;
const DEFAULT_PERMISSIONS: &str = "0755";
const ANY_IPV4: &str = "0.0.0.0/0";

/// Planned resources for one world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldTopology {
    pub world_id: WorldId,
    pub network: NetworkHandle,
    pub volume: VolumeHandle,
    pub cluster: ClusterHandle,
    pub compute: ComputeUnit,
    pub scaling: StepScalingPolicy,
}

/// Isolated network with inbound access limited to game ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkHandle {
    pub name: String,
    pub max_azs: u32,
    pub nat_gateways: u32,
    pub assign_public_ip: bool,
    pub ingress: Vec<IngressRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub port: u16,
    pub protocol: Protocol,
    pub source: String,
}

/// Access point on the shared file store, owned by one POSIX identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeHandle {
    pub access_point_path: String,
    pub owner_uid: u32,
    pub owner_gid: u32,
    pub permissions: String,
    pub container_paths: Vec<String>,
    pub transit_encryption: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterHandle {
    pub name: String,
    /// Capacity providers in priority order.
    pub capacity: Vec<CapacityStrategy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityStrategy {
    pub class: CapacityClass,
    pub weight: u32,
    pub base: u32,
}

/// The single scalable service carrying the game and its watchdog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeUnit {
    pub service: String,
    pub task_family: String,
    pub cpu: u32,
    pub memory_mib: u32,
    pub min_count: u32,
    pub max_count: u32,
    pub initial_count: u32,
}

/// Topology planner.
pub struct Topology;

impl Topology {
    /// Validate and plan a single world.
    pub fn plan(world: &WorldConfig) -> ConfigResult<WorldTopology> {
        let id = &world.id;
        for name in [
            world.id.clone(),
            world.cluster_name(),
            world.service_name(),
            world.task_family_name(),
        ] {
            if !is_valid_identifier(&name) {
                return Err(ConfigError::InvalidIdentifier(name));
            }
        }

        let network = plan_network(world)?;
        let volume = plan_volume(world)?;
        let cluster = plan_cluster(world)?;
        let compute = plan_compute(world)?;

        if world.dns.zone_id.trim().is_empty() || world.dns.record_name.trim().is_empty() {
            return Err(ConfigError::MissingDns(id.clone()));
        }

        let scaling = StepScalingPolicy::resolve(id, world.scaling.as_ref())?;

        debug!(world = %id, ports = network.ingress.len(), "world topology planned");

        Ok(WorldTopology {
            world_id: id.clone(),
            network,
            volume,
            cluster,
            compute,
            scaling,
        })
    }

    /// Plan every world, rejecting duplicates and shared volume paths.
    pub fn plan_all(worlds: &[WorldConfig]) -> ConfigResult<Vec<WorldTopology>> {
        let mut seen_ids = HashSet::new();
        let mut mount_owners: HashMap<String, String> = HashMap::new();
        let mut plans = Vec::with_capacity(worlds.len());

        for world in worlds {
            if !seen_ids.insert(world.id.clone()) {
                return Err(ConfigError::DuplicateWorld(world.id.clone()));
            }
            let plan = Self::plan(world)?;
            let path = plan.volume.access_point_path.clone();
            if let Some(first) = mount_owners.get(&path) {
                return Err(ConfigError::SharedMountPath {
                    path,
                    first: first.clone(),
                    second: world.id.clone(),
                });
            }
            mount_owners.insert(path, world.id.clone());
            plans.push(plan);
        }

        Ok(plans)
    }
}

fn plan_network(world: &WorldConfig) -> ConfigResult<NetworkHandle> {
    if world.ports.is_empty() {
        return Err(ConfigError::NoPorts(world.id.clone()));
    }

    let mut seen = HashSet::new();
    let mut ingress = Vec::with_capacity(world.ports.len());
    for mapping in &world.ports {
        if mapping.port == 0 || mapping.port == NFS_PORT {
            return Err(ConfigError::ReservedPort {
                world: world.id.clone(),
                port: mapping.port,
            });
        }
        if !seen.insert((mapping.port, mapping.protocol)) {
            return Err(ConfigError::DuplicatePort {
                world: world.id.clone(),
                port: mapping.port,
            });
        }
        ingress.push(IngressRule {
            port: mapping.port,
            protocol: mapping.protocol,
            source: ANY_IPV4.to_string(),
        });
    }

    Ok(NetworkHandle {
        name: format!("{}-vpc", world.id),
        max_azs: 2,
        nat_gateways: 0,
        assign_public_ip: true,
        ingress,
    })
}

fn plan_volume(world: &WorldConfig) -> ConfigResult<VolumeHandle> {
    let volume = &world.volume;
    if (volume.uid == 0 || volume.gid == 0) && !volume.allow_root {
        return Err(ConfigError::RootIdentity(world.id.clone()));
    }

    let permissions = volume
        .permissions
        .clone()
        .unwrap_or_else(|| DEFAULT_PERMISSIONS.to_string());
    let octal_ok = permissions.len() == 4
        && permissions.chars().all(|c| ('0'..='7').contains(&c));
    if !octal_ok {
        return Err(ConfigError::InvalidPermissions {
            world: world.id.clone(),
            value: permissions,
        });
    }

    let container_paths = if volume.container_paths.is_empty() {
        vec!["/config".to_string()]
    } else {
        volume.container_paths.clone()
    };

    Ok(VolumeHandle {
        access_point_path: world.mount_path(),
        owner_uid: volume.uid,
        owner_gid: volume.gid,
        permissions,
        container_paths,
        transit_encryption: true,
    })
}

fn plan_cluster(world: &WorldConfig) -> ConfigResult<ClusterHandle> {
    let capacity_config = world.capacity.clone().unwrap_or_default();
    let mut capacity = Vec::new();
    if capacity_config.spot {
        capacity.push(CapacityStrategy {
            class: CapacityClass::Spot,
            weight: 1,
            base: 1,
        });
    }
    if capacity_config.on_demand_fallback {
        capacity.push(CapacityStrategy {
            class: CapacityClass::OnDemand,
            weight: 0,
            base: if capacity.is_empty() { 1 } else { 0 },
        });
    }
    if capacity.is_empty() {
        return Err(ConfigError::NoCapacity(world.id.clone()));
    }

    Ok(ClusterHandle {
        name: world.cluster_name(),
        capacity,
    })
}

fn plan_compute(world: &WorldConfig) -> ConfigResult<ComputeUnit> {
    let cpu = world.cpu.unwrap_or(DEFAULT_CPU);
    let memory_mib = world.memory_mib.unwrap_or(DEFAULT_MEMORY_MIB);
    if !is_valid_task_size(cpu, memory_mib) {
        return Err(ConfigError::InvalidTaskSize {
            world: world.id.clone(),
            cpu,
            memory_mib,
        });
    }

    Ok(ComputeUnit {
        service: world.service_name(),
        task_family: world.task_family_name(),
        cpu,
        memory_mib,
        min_count: 0,
        max_count: MAX_DESIRED_COUNT,
        initial_count: 0,
    })
}

/// Serverless container sizes: each cpu tier allows a fixed memory range.
fn is_valid_task_size(cpu: u32, memory_mib: u32) -> bool {
    match cpu {
        256 => matches!(memory_mib, 512 | 1024 | 2048),
        512 => (1024..=4096).contains(&memory_mib) && memory_mib % 1024 == 0,
        1024 => (2048..=8192).contains(&memory_mib) && memory_mib % 1024 == 0,
        2048 => (4096..=16384).contains(&memory_mib) && memory_mib % 1024 == 0,
        4096 => (8192..=30720).contains(&memory_mib) && memory_mib % 1024 == 0,
        _ => false,
    }
}
