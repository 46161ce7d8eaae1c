//! Shared types used across dormant crates.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique identifier for a world.
pub type WorldId = String;

/// Identifier of a hosted DNS zone.
pub type ZoneId = String;

/// Upper bound on the desired instance count of any world.
pub const MAX_DESIRED_COUNT: u32 = 1;

/// Address written to a world's DNS record before its first launch.
pub const PLACEHOLDER_ADDRESS: &str = "0.0.0.0";

/// Port used by the managed file store; never opened to the internet.
pub const NFS_PORT: u16 = 2049;

/// Canonical form of a DNS record name: lowercase, no trailing dot.
pub fn normalize_record_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Transport protocol of a game port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

/// A port the game server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    pub port: u16,
    pub protocol: Protocol,
}

impl std::str::FromStr for PortMapping {
    type Err = String;

    /// Parse `7777/udp` or `9001/tcp`. A bare port number means UDP.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (port, protocol) = match s.trim().split_once('/') {
            Some((port, proto)) => (port, proto),
            None => (s.trim(), "udp"),
        };
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("invalid port in {s:?}"))?;
        let protocol = match protocol.to_ascii_lowercase().as_str() {
            "udp" => Protocol::Udp,
            "tcp" => Protocol::Tcp,
            other => return Err(format!("unknown protocol {other:?} in {s:?}")),
        };
        Ok(Self { port, protocol })
    }
}

/// Pricing class of the compute capacity backing a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityClass {
    Spot,
    OnDemand,
}

/// Seconds since the unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Reject identifiers that could address more than one resource.
///
/// World, cluster, and service names end up inside resource patterns, so
/// path separators and wildcard characters are not allowed.
pub fn is_valid_identifier(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
