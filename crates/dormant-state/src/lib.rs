//! dormant-state: durable world state for dormant.
//!
//! Backed by [redb](https://docs.rs/redb), this is the reference provider's
//! storage: each world's desired instance count, its DNS record, recent
//! utilization samples, and an audit log of scaling actions.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Every mutation is a single write transaction, so a read-modify-write of
//! the desired count is atomic with respect to other actors. Each write that
//! changes the count bumps the world's `revision`, which doubles as the
//! compare-and-set token.
//!
//! Writing the value a record already holds is a no-op: no revision bump,
//! no timestamp change, no event.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
