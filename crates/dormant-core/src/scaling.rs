//! Step-scaling policy resolved from `[world.scaling]`.
//!
//! Defaults follow the factory-game deployment: scale down by one after four
//! five-minute periods below 10% utilization, hold between 10% and 50%, and
//! wait twenty minutes after any action.

use serde::{Deserialize, Serialize};

use crate::config::ScalingConfig;
use crate::duration::parse_or;
use crate::error::{ConfigError, ConfigResult};

pub const DEFAULT_LOW_THRESHOLD: f64 = 10.0;
pub const DEFAULT_HIGH_THRESHOLD: f64 = 50.0;
pub const DEFAULT_EVALUATION_PERIODS: u32 = 4;
pub const DEFAULT_PERIOD_SECS: u64 = 5 * 60;
pub const DEFAULT_COOLDOWN_SECS: u64 = 20 * 60;

/// Concrete scaling parameters for one world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepScalingPolicy {
    /// Utilization (percent) below which a period counts as idle.
    pub low_threshold: f64,
    /// Lower bound of the no-change band above the idle zone.
    pub high_threshold: f64,
    /// Consecutive idle periods required before scaling down.
    pub evaluation_periods: u32,
    /// Length of one evaluation period, in seconds.
    pub period_secs: u64,
    /// Quiet time after any desired-count change, in seconds.
    pub cooldown_secs: u64,
}

impl Default for StepScalingPolicy {
    fn default() -> Self {
        Self {
            low_threshold: DEFAULT_LOW_THRESHOLD,
            high_threshold: DEFAULT_HIGH_THRESHOLD,
            evaluation_periods: DEFAULT_EVALUATION_PERIODS,
            period_secs: DEFAULT_PERIOD_SECS,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
        }
    }
}

impl StepScalingPolicy {
    /// Resolve an optional config section, applying defaults.
    pub fn resolve(world: &str, config: Option<&ScalingConfig>) -> ConfigResult<Self> {
        let Some(config) = config else {
            return Ok(Self::default());
        };
        let defaults = Self::default();

        let period = parse_or(
            config.period.as_deref(),
            std::time::Duration::from_secs(defaults.period_secs),
        )
        .ok_or_else(|| ConfigError::InvalidDuration {
            world: world.to_string(),
            field: "scaling.period",
            value: config.period.clone().unwrap_or_default(),
        })?;
        let cooldown = parse_or(
            config.cooldown.as_deref(),
            std::time::Duration::from_secs(defaults.cooldown_secs),
        )
        .ok_or_else(|| ConfigError::InvalidDuration {
            world: world.to_string(),
            field: "scaling.cooldown",
            value: config.cooldown.clone().unwrap_or_default(),
        })?;

        let policy = Self {
            low_threshold: config.low_threshold.unwrap_or(defaults.low_threshold),
            high_threshold: config.high_threshold.unwrap_or(defaults.high_threshold),
            evaluation_periods: config
                .evaluation_periods
                .unwrap_or(defaults.evaluation_periods),
            period_secs: period.as_secs(),
            cooldown_secs: cooldown.as_secs(),
        };
        policy.validate(world)?;
        Ok(policy)
    }

    /// Check the thresholds leave a dead zone and the window is non-empty.
    pub fn validate(&self, world: &str) -> ConfigResult<()> {
        let invalid = |reason: &str| ConfigError::InvalidScaling {
            world: world.to_string(),
            reason: reason.to_string(),
        };
        if !(0.0..=100.0).contains(&self.low_threshold)
            || !(0.0..=100.0).contains(&self.high_threshold)
        {
            return Err(invalid("thresholds must be percentages"));
        }
        if self.low_threshold >= self.high_threshold {
            return Err(invalid("low_threshold must be below high_threshold"));
        }
        if self.evaluation_periods == 0 {
            return Err(invalid("evaluation_periods must be at least 1"));
        }
        if self.period_secs == 0 {
            return Err(invalid("period must be non-zero"));
        }
        Ok(())
    }

    /// Total length of the evaluation window, in seconds.
    pub fn window_secs(&self) -> u64 {
        self.period_secs * self.evaluation_periods as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_section_uses_defaults() {
        let policy = StepScalingPolicy::resolve("w", None).unwrap();
        assert_eq!(policy, StepScalingPolicy::default());
        assert_eq!(policy.window_secs(), 20 * 60);
    }

    #[test]
    fn overrides_apply() {
        let config = ScalingConfig {
            low_threshold: Some(15.0),
            high_threshold: None,
            evaluation_periods: Some(5),
            period: None,
            cooldown: Some("30m".to_string()),
        };
        let policy = StepScalingPolicy::resolve("valheim", Some(&config)).unwrap();
        assert_eq!(policy.low_threshold, 15.0);
        assert_eq!(policy.high_threshold, 50.0);
        assert_eq!(policy.evaluation_periods, 5);
        assert_eq!(policy.cooldown_secs, 1800);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let config = ScalingConfig {
            low_threshold: Some(60.0),
            high_threshold: Some(50.0),
            evaluation_periods: None,
            period: None,
            cooldown: None,
        };
        let err = StepScalingPolicy::resolve("w", Some(&config)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidScaling { .. }));
    }

    #[test]
    fn bad_duration_rejected() {
        let config = ScalingConfig {
            low_threshold: None,
            high_threshold: None,
            evaluation_periods: None,
            period: Some("often".to_string()),
            cooldown: None,
        };
        let err = StepScalingPolicy::resolve("w", Some(&config)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidDuration { field: "scaling.period", .. }
        ));
    }
}
