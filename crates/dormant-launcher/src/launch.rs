//! The single idempotent launcher action.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use dormant_provider::{RetryPolicy, ServiceScheduler, retry_transient};

use crate::error::LaunchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchStatus {
    Started,
    AlreadyRunning,
}

/// Response body of a launch trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchOutcome {
    pub world: String,
    pub status: LaunchStatus,
    pub desired_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Stopping,
    AlreadyStopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub world: String,
    pub status: StopStatus,
}

pub struct Launcher {
    scheduler: Arc<dyn ServiceScheduler>,
    default_world: Option<String>,
    retry: RetryPolicy,
}

impl Launcher {
    pub fn new(scheduler: Arc<dyn ServiceScheduler>, default_world: Option<String>) -> Self {
        Self {
            scheduler,
            default_world,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn default_world(&self) -> Result<&str, LaunchError> {
        self.default_world
            .as_deref()
            .ok_or(LaunchError::NoDefaultWorld)
    }

    /// Assert desired count = 1 for `world`.
    pub async fn launch(&self, world: &str) -> Result<LaunchOutcome, LaunchError> {
        let scheduler = &self.scheduler;
        let change = retry_transient(&self.retry, "launch", move || {
            scheduler.set_desired_count(world, 1)
        })
        .await?;

        let status = if change.changed {
            info!(%world, revision = change.revision, "launch accepted");
            LaunchStatus::Started
        } else {
            info!(%world, "already running");
            LaunchStatus::AlreadyRunning
        };
        Ok(LaunchOutcome {
            world: world.to_string(),
            status,
            desired_count: change.current,
        })
    }

    /// Set desired count = 0 for `world`.
    pub async fn stop(&self, world: &str) -> Result<StopOutcome, LaunchError> {
        let scheduler = &self.scheduler;
        let change = retry_transient(&self.retry, "stop", move || {
            scheduler.set_desired_count(world, 0)
        })
        .await?;

        let status = if change.changed {
            info!(%world, revision = change.revision, "stop accepted");
            StopStatus::Stopping
        } else {
            StopStatus::AlreadyStopped
        };
        Ok(StopOutcome {
            world: world.to_string(),
            status,
        })
    }
}
