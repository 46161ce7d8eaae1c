//! dormant-autoscale: step-scaling policy engine.
//!
//! Reads utilization samples for each running world, buckets them into
//! evaluation periods, and decides whether the world should drop from one
//! instance to zero.
//!
//! # Decision
//!
//! ```text
//! periods = last N windows of `period` seconds, newest first
//!
//! any period without a sample        -> NoData   (never scale on silence)
//! within cooldown of the last change -> Cooldown
//! every period average < low         -> ScaleTo(desired - 1)
//! otherwise                          -> NoChange (band or dead zone)
//! ```
//!
//! The engine only ever scales down. Scale-up belongs to the launcher.
//! Decisions are applied with compare-and-set against the revision read at
//! the start of the evaluation; if another actor wrote in between, the
//! decision is dropped for that cycle.

pub mod policy;
pub mod scaler;

pub use policy::{WindowVerdict, evaluate_window};
pub use scaler::{Autoscaler, ScaleDecision};
