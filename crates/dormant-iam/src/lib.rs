//! dormant-iam: least-privilege permissions for the lifecycle actors.
//!
//! Every actor (autoscaler, per-world watchdog, launcher) acts as a named
//! [`Principal`]. A [`Grant`] pins one principal to one concrete resource
//! (a service, a task family, or one DNS record) and a set of [`Action`]s.
//! Scopes never contain wildcards, so a grant for one world can never
//! reach another.
//!
//! [`Policy::authorize`] is default-deny.

pub mod error;
pub mod grant;
pub mod policy;

pub use error::{IamError, IamResult};
pub use grant::{Action, Grant, Principal, ResourceScope};
pub use policy::{Policy, WorldScope, grants_for_world};
