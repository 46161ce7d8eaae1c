//! Autoscaler: utilization-driven scale-to-zero.
//!
//! Reads each world's recent samples through the [`ServiceScheduler`],
//! evaluates the step policy, and applies scale-downs with
//! compare-and-set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use dormant_core::epoch_secs;
use dormant_provider::{
    ProviderError, ProviderResult, RetryPolicy, ServiceScheduler, WorldRecord, retry_transient,
};

use crate::policy::{WindowVerdict, evaluate_window};

/// A scaling decision for a single world.
#[derive(Debug, Clone, PartialEq)]
pub enum ScaleDecision {
    /// Scale to the specified instance count.
    ScaleTo(u32),
    /// No change needed.
    NoChange,
    /// Not enough telemetry to decide.
    NoData,
    /// A recent desired-count change suppresses action.
    Cooldown { remaining_secs: u64 },
    /// Another actor changed the world first; the decision was dropped.
    Superseded,
}

/// The autoscaler evaluates utilization and decides whether a world
/// should be scaled down.
pub struct Autoscaler {
    scheduler: Arc<dyn ServiceScheduler>,
    /// Last time this engine changed each world.
    last_action: HashMap<String, u64>,
    retry: RetryPolicy,
}

impl Autoscaler {
    pub fn new(scheduler: Arc<dyn ServiceScheduler>) -> Self {
        Self {
            scheduler,
            last_action: HashMap::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Most recent desired-count change by any actor.
    async fn last_change(&self, world: &WorldRecord) -> ProviderResult<u64> {
        let logged = self
            .scheduler
            .scale_events(&world.id, 1)
            .await?
            .first()
            .map(|e| e.epoch)
            .unwrap_or(0);
        let own = self.last_action.get(&world.id).copied().unwrap_or(0);
        Ok(logged.max(own))
    }

    /// Decide what should happen to one world at time `now`.
    pub async fn evaluate(&self, world: &WorldRecord, now: u64) -> ProviderResult<ScaleDecision> {
        if world.desired_count == 0 {
            return Ok(ScaleDecision::NoChange);
        }
        let policy = &world.scaling;

        let last_change = self.last_change(world).await?;
        let elapsed = now.saturating_sub(last_change);
        if last_change > 0 && elapsed < policy.cooldown_secs {
            return Ok(ScaleDecision::Cooldown {
                remaining_secs: policy.cooldown_secs - elapsed,
            });
        }

        let since = now.saturating_sub(policy.window_secs());
        let samples = self.scheduler.recent_samples(&world.id, since).await?;

        Ok(match evaluate_window(policy, &samples, now) {
            WindowVerdict::NoData { missing_periods } => {
                debug!(world = %world.id, missing_periods, "no utilization data, holding");
                ScaleDecision::NoData
            }
            WindowVerdict::BelowThreshold { averages } => {
                debug!(
                    world = %world.id,
                    ?averages,
                    threshold = policy.low_threshold,
                    "idle for every evaluation period"
                );
                ScaleDecision::ScaleTo(world.desired_count - 1)
            }
            WindowVerdict::InBand { .. } | WindowVerdict::DeadZone { .. } => {
                ScaleDecision::NoChange
            }
        })
    }

    /// Evaluate one world and apply a scale-down if warranted.
    pub async fn reconcile(&mut self, world: &WorldRecord, now: u64) -> ProviderResult<ScaleDecision> {
        let decision = self.evaluate(world, now).await?;
        let ScaleDecision::ScaleTo(target) = decision else {
            return Ok(decision);
        };

        let scheduler = &self.scheduler;
        let result = retry_transient(&self.retry, "scale down", move || {
            scheduler.compare_and_set_desired_count(&world.id, world.revision, target)
        })
        .await;

        match result {
            Ok(change) => {
                self.last_action.insert(world.id.clone(), now);
                info!(
                    world = %world.id,
                    from = change.previous,
                    to = change.current,
                    revision = change.revision,
                    "scaled down idle world"
                );
                Ok(ScaleDecision::ScaleTo(target))
            }
            Err(ProviderError::Conflict(reason)) => {
                info!(world = %world.id, %reason, "world changed during evaluation, dropping decision");
                Ok(ScaleDecision::Superseded)
            }
            Err(e) => Err(e),
        }
    }

    /// Evaluate every world visible to the engine.
    pub async fn evaluate_all(&mut self, now: u64) -> anyhow::Result<Vec<(String, ScaleDecision)>> {
        let worlds = self.scheduler.list_worlds().await?;
        let mut decisions = Vec::new();

        for world in &worlds {
            match self.reconcile(world, now).await {
                Ok(decision) => decisions.push((world.id.clone(), decision)),
                Err(e) => {
                    warn!(world = %world.id, error = %e, "autoscaler evaluation failed");
                }
            }
        }

        Ok(decisions)
    }

    /// Run the autoscaler loop.
    pub async fn run(&mut self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "autoscaler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.evaluate_all(epoch_secs()).await {
                        tracing::error!(error = %e, "autoscaler evaluation failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}
