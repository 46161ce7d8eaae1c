//! dormant.toml configuration parser.
//!
//! ```toml
//! [control]
//! port = 8480
//! autoscale_interval = "60s"
//!
//! [launcher]
//! default_world = "satisfactory"
//!
//! [[principals]]
//! name = "watchdog:satisfactory"
//! token = "..."
//!
//! [[world]]
//! id = "satisfactory"
//! cpu = 1024
//! memory_mib = 5120
//! ports = [{ port = 7777, protocol = "udp" }]
//!
//! [world.volume]
//! container_paths = ["/config"]
//! uid = 1000
//! gid = 1000
//!
//! [world.dns]
//! zone_id = "Z07326652201O046A8CXC"
//! record_name = "hamlet.link"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::types::PortMapping;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DormantConfig {
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub launcher: LauncherConfig,
    #[serde(default)]
    pub principals: Vec<PrincipalConfig>,
    #[serde(default, rename = "world")]
    pub worlds: Vec<WorldConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlConfig {
    pub port: Option<u16>,
    pub autoscale_interval: Option<String>,
    pub metrics_retention: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// World launched by a bare `POST /launch`.
    pub default_world: Option<String>,
    /// Hex-encoded Ed25519 key for signed chat interactions.
    pub interaction_public_key: Option<String>,
    /// Principal the launcher acts as.
    pub principal: Option<String>,
}

/// Bearer token to principal mapping for the provider API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalConfig {
    pub name: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    pub id: String,
    pub cluster: Option<String>,
    pub service: Option<String>,
    pub task_family: Option<String>,
    pub cpu: Option<u32>,
    pub memory_mib: Option<u32>,
    pub ports: Vec<PortMapping>,
    pub volume: VolumeConfig,
    pub dns: DnsConfig,
    pub scaling: Option<ScalingConfig>,
    pub capacity: Option<CapacityConfig>,
    pub webhook: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub mount_path: Option<String>,
    #[serde(default)]
    pub container_paths: Vec<String>,
    pub uid: u32,
    pub gid: u32,
    pub permissions: Option<String>,
    #[serde(default)]
    pub allow_root: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    pub zone_id: String,
    pub record_name: String,
    pub ttl: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalingConfig {
    pub low_threshold: Option<f64>,
    pub high_threshold: Option<f64>,
    pub evaluation_periods: Option<u32>,
    pub period: Option<String>,
    pub cooldown: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityConfig {
    #[serde(default = "default_true")]
    pub spot: bool,
    #[serde(default = "default_true")]
    pub on_demand_fallback: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            spot: true,
            on_demand_fallback: true,
        }
    }
}

/// Default DNS TTL: short enough to follow one watchdog cycle.
pub const DEFAULT_DNS_TTL: u32 = 30;

impl DormantConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Look up a world by id.
    pub fn world(&self, id: &str) -> Option<&WorldConfig> {
        self.worlds.iter().find(|w| w.id == id)
    }

    /// Find the principal a bearer token belongs to.
    pub fn principal_for_token(&self, token: &str) -> Option<&str> {
        self.principals
            .iter()
            .find(|p| p.token == token)
            .map(|p| p.name.as_str())
    }
}

impl WorldConfig {
    pub fn cluster_name(&self) -> String {
        self.cluster
            .clone()
            .unwrap_or_else(|| format!("{}-cluster", self.id))
    }

    pub fn service_name(&self) -> String {
        self.service
            .clone()
            .unwrap_or_else(|| format!("{}-service", self.id))
    }

    pub fn task_family_name(&self) -> String {
        self.task_family.clone().unwrap_or_else(|| self.id.clone())
    }

    /// Path of the world's access point on the shared file store.
    pub fn mount_path(&self) -> String {
        self.volume
            .mount_path
            .clone()
            .unwrap_or_else(|| format!("/{}", self.id))
    }

    pub fn dns_ttl(&self) -> u32 {
        self.dns.ttl.unwrap_or(DEFAULT_DNS_TTL)
    }
}
