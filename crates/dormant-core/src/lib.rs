//! dormant-core: shared types, world configuration, and resource topology.
//!
//! A world is declared once in `dormant.toml` and planned into the durable
//! resources it needs (network, volume, cluster) before anything runs.

pub mod config;
pub mod duration;
pub mod error;
pub mod scaling;
pub mod topology;
pub mod types;

pub use config::{DormantConfig, WorldConfig};
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
pub use scaling::StepScalingPolicy;
pub use topology::{Topology, WorldTopology};
pub use types::*;
