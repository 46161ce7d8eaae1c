//! dormant-launcher: the externally triggered scale-up.
//!
//! The launcher is stateless. Every trigger asserts desired count = 1 for
//! one world and returns as soon as the scheduler accepted the write; it
//! never waits for the instance to become healthy. Repeated and concurrent
//! triggers are safe because the scheduler treats writing the current
//! value as a no-op.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/launch` | Launch the default world |
//! | POST | `/launch/{world}` | Launch a named world |
//! | POST | `/interactions` | Signed chat command (`start` / `stop`) |

pub mod error;
pub mod interaction;
pub mod launch;
pub mod router;

pub use error::LaunchError;
pub use interaction::{InteractionVerifier, handle_interaction};
pub use launch::{LaunchOutcome, LaunchStatus, Launcher, StopOutcome, StopStatus};
pub use router::{LauncherState, build_router};
