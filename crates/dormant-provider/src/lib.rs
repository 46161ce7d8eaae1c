//! dormant-provider: the seam between lifecycle actors and the platform.
//!
//! Actors never touch storage directly. They talk to a [`ServiceScheduler`]
//! (desired instance count, utilization metrics) and a [`DnsZone`]
//! (address records). This crate ships three layers:
//!
//! - [`LocalProvider`]: the reference backend over [`dormant_state::StateStore`]
//! - [`HttpProvider`]: a client for the provider HTTP API, used by sidecars
//!   running away from the store
//! - [`GuardedScheduler`] / [`GuardedDns`]: permission enforcement around
//!   any backend
//!
//! [`retry_transient`] wraps calls with exponential backoff on transient
//! failures only.

pub mod error;
pub mod guarded;
pub mod http;
pub mod local;
pub mod retry;
pub mod traits;
pub mod wire;

pub use error::{ProviderError, ProviderResult};
pub use guarded::{GuardedDns, GuardedScheduler};
pub use http::HttpProvider;
pub use local::LocalProvider;
pub use retry::{RetryPolicy, retry_transient};
pub use traits::{DnsZone, ServiceScheduler};

pub use dormant_state::{
    DesiredCountChange, DnsChange, DnsRecordEntry, MetricSample, ScaleEvent, WorldRecord,
};
