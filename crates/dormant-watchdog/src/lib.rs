//! dormant-watchdog: the sidecar that runs next to each game server.
//!
//! Every cycle the watchdog:
//!
//! 1. asks an [`ActivitySource`] whether any player is connected
//! 2. compares the instance's public address against the last value
//!    published to DNS and republishes on change
//! 3. reports a CPU utilization sample so the autoscaler has a metric
//! 4. feeds the activity observation to the [`IdleTracker`]; once the world
//!    has been idle long enough it sets the desired count to zero and stops
//!    issuing mutations, unless the world is relaunched before this
//!    instance is stopped, in which case it starts waiting for players again
//!
//! Probe failures count as "unknown" and freeze the idle clock. DNS and
//! webhook failures are logged and retried on the next cycle; neither ever
//! blocks the shutdown request.

pub mod cpu;
pub mod error;
pub mod idle;
pub mod notify;
pub mod probe;
pub mod watchdog;

pub use cpu::CpuSampler;
pub use error::ProbeError;
pub use idle::{IdleEvent, IdleTracker, Phase};
pub use notify::{Notice, Notifier};
pub use probe::{
    ActivitySource, AddressSource, ConnectionTableProbe, DEFAULT_MIN_DATAGRAMS, MetadataAddress,
    StaticAddress,
};
pub use watchdog::{CycleReport, Watchdog, WatchdogSettings};
