//! Idle detection state machine.
//!
//! ```text
//! WaitingForPlayers(since) --player--> Active --no players--> Idle(since)
//!        |                               ^                        |
//!        | grace elapsed                 +--------player----------+
//!        v                                                        | idle timeout
//!   IdleTimeout event  <------------------------------------------+
//!        |
//!        | shutdown accepted
//!        v
//!   ShuttingDown --relaunched before the instance stopped--> WaitingForPlayers(now)
//! ```
//!
//! An unknown observation (probe error) freezes the clock: the time it
//! covers is added back to `since`, so it neither counts towards the
//! timeout nor resets it.

use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Started; no player seen yet.
    WaitingForPlayers { since: u64 },
    Active,
    /// Players left at `since`.
    Idle { since: u64 },
    /// Scale-to-zero accepted; no further mutations unless relaunched.
    ShuttingDown,
}

/// What an observation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleEvent {
    None,
    PlayersJoined,
    PlayersLeft,
    /// The world has been idle long enough to stop.
    IdleTimeout { idle_secs: u64 },
}

#[derive(Debug, Clone)]
pub struct IdleTracker {
    phase: Phase,
    idle_timeout: u64,
    startup_grace: u64,
    last_observed: u64,
}

impl IdleTracker {
    pub fn new(idle_timeout: Duration, startup_grace: Duration, started_at: u64) -> Self {
        Self {
            phase: Phase::WaitingForPlayers { since: started_at },
            idle_timeout: idle_timeout.as_secs(),
            startup_grace: startup_grace.as_secs(),
            last_observed: started_at,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_shutting_down(&self) -> bool {
        self.phase == Phase::ShuttingDown
    }

    /// The scale-to-zero request succeeded.
    pub fn mark_shutting_down(&mut self) {
        self.phase = Phase::ShuttingDown;
    }

    /// The world was scaled back up while this instance was still running.
    /// Restart the wait for players from `now`.
    pub fn resume(&mut self, now: u64) {
        self.phase = Phase::WaitingForPlayers { since: now };
        self.last_observed = now;
    }

    /// Seconds the world has counted as idle at `now`.
    pub fn idle_secs(&self, now: u64) -> Option<u64> {
        match self.phase {
            Phase::WaitingForPlayers { since } | Phase::Idle { since } => {
                Some(now.saturating_sub(since))
            }
            Phase::Active | Phase::ShuttingDown => None,
        }
    }

    /// Feed one probe result: `Some(active)` or `None` when unknown.
    pub fn observe(&mut self, activity: Option<bool>, now: u64) -> IdleEvent {
        let gap = now.saturating_sub(self.last_observed);
        self.last_observed = now;

        match (self.phase, activity) {
            (Phase::ShuttingDown, _) => IdleEvent::None,

            (Phase::WaitingForPlayers { since }, None) => {
                self.phase = Phase::WaitingForPlayers { since: since + gap };
                IdleEvent::None
            }
            (Phase::Idle { since }, None) => {
                self.phase = Phase::Idle { since: since + gap };
                IdleEvent::None
            }
            (Phase::Active, None) => IdleEvent::None,

            (Phase::Active, Some(true)) => IdleEvent::None,
            (Phase::WaitingForPlayers { .. } | Phase::Idle { .. }, Some(true)) => {
                debug!("players connected");
                self.phase = Phase::Active;
                IdleEvent::PlayersJoined
            }

            (Phase::Active, Some(false)) => {
                debug!("last player left");
                self.phase = Phase::Idle { since: now };
                IdleEvent::PlayersLeft
            }
            (Phase::WaitingForPlayers { since }, Some(false)) => {
                timeout_event(now.saturating_sub(since), self.startup_grace)
            }
            (Phase::Idle { since }, Some(false)) => {
                timeout_event(now.saturating_sub(since), self.idle_timeout)
            }
        }
    }
}

fn timeout_event(idle_secs: u64, limit: u64) -> IdleEvent {
    if idle_secs >= limit {
        IdleEvent::IdleTimeout { idle_secs }
    } else {
        IdleEvent::None
    }
}
