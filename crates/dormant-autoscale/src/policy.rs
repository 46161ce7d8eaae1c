//! Evaluation-period bucketing for the step-scaling policy.

use dormant_core::StepScalingPolicy;
use dormant_provider::MetricSample;

/// What the samples in the evaluation window say.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowVerdict {
    /// At least one period had no sample.
    NoData { missing_periods: u32 },
    /// Every period averaged below the low threshold.
    BelowThreshold { averages: Vec<f64> },
    /// The latest period is at or above the band's lower bound.
    InBand { latest: f64 },
    /// Neither idle long enough nor in band.
    DeadZone { latest: f64 },
}

/// Average of each period, newest first. `None` marks a missing period.
pub fn period_averages(
    policy: &StepScalingPolicy,
    samples: &[MetricSample],
    now: u64,
) -> Vec<Option<f64>> {
    let period = policy.period_secs.max(1);
    (0..u64::from(policy.evaluation_periods))
        .map(|i| {
            let end = now.saturating_sub(i * period);
            let start = now.saturating_sub((i + 1) * period);
            let (sum, count) = samples
                .iter()
                .filter(|s| s.epoch > start && s.epoch <= end)
                .fold((0.0, 0u32), |(sum, n), s| (sum + s.utilization, n + 1));
            (count > 0).then(|| sum / f64::from(count))
        })
        .collect()
}

pub fn evaluate_window(
    policy: &StepScalingPolicy,
    samples: &[MetricSample],
    now: u64,
) -> WindowVerdict {
    let periods = period_averages(policy, samples, now);

    let missing = periods.iter().filter(|p| p.is_none()).count() as u32;
    if missing > 0 || periods.is_empty() {
        return WindowVerdict::NoData {
            missing_periods: missing,
        };
    }

    let averages: Vec<f64> = periods.into_iter().flatten().collect();
    let latest = averages[0];
    if averages.iter().all(|avg| *avg < policy.low_threshold) {
        WindowVerdict::BelowThreshold { averages }
    } else if latest >= policy.high_threshold {
        WindowVerdict::InBand { latest }
    } else {
        WindowVerdict::DeadZone { latest }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_000_000;

    fn policy() -> StepScalingPolicy {
        StepScalingPolicy::default()
    }

    /// One sample in the middle of each period, oldest first.
    fn samples(values_oldest_first: &[f64]) -> Vec<MetricSample> {
        let n = values_oldest_first.len() as u64;
        values_oldest_first
            .iter()
            .enumerate()
            .map(|(i, v)| MetricSample {
                world_id: "w".to_string(),
                epoch: NOW - (n - i as u64) * 300 + 150,
                utilization: *v,
            })
            .collect()
    }

    #[test]
    fn all_periods_low_is_below_threshold() {
        let verdict = evaluate_window(&policy(), &samples(&[2.0, 3.0, 1.0, 0.5]), NOW);
        assert!(matches!(verdict, WindowVerdict::BelowThreshold { .. }));
    }

    #[test]
    fn three_low_then_high_holds() {
        let verdict = evaluate_window(&policy(), &samples(&[2.0, 3.0, 1.0, 60.0]), NOW);
        assert_eq!(verdict, WindowVerdict::InBand { latest: 60.0 });
    }

    #[test]
    fn one_busy_period_in_the_middle_holds() {
        let verdict = evaluate_window(&policy(), &samples(&[2.0, 30.0, 1.0, 4.0]), NOW);
        assert_eq!(verdict, WindowVerdict::DeadZone { latest: 4.0 });
    }

    #[test]
    fn fewer_periods_than_required_is_no_data() {
        let verdict = evaluate_window(&policy(), &samples(&[1.0, 1.0, 1.0]), NOW);
        assert_eq!(verdict, WindowVerdict::NoData { missing_periods: 1 });
    }

    #[test]
    fn empty_window_is_no_data() {
        let verdict = evaluate_window(&policy(), &[], NOW);
        assert_eq!(verdict, WindowVerdict::NoData { missing_periods: 4 });
    }

    #[test]
    fn gap_in_window_is_no_data() {
        let mut s = samples(&[1.0, 1.0, 1.0, 1.0]);
        s.remove(1);
        assert!(matches!(
            evaluate_window(&policy(), &s, NOW),
            WindowVerdict::NoData { missing_periods: 1 }
        ));
    }

    #[test]
    fn period_average_uses_all_samples() {
        let mut s = samples(&[1.0, 1.0, 1.0, 4.0]);
        s.push(MetricSample {
            world_id: "w".to_string(),
            epoch: NOW - 10,
            utilization: 20.0,
        });
        let averages = period_averages(&policy(), &s, NOW);
        assert_eq!(averages[0], Some(12.0));
        // 12% is above the 10% idle threshold.
        assert_eq!(
            evaluate_window(&policy(), &s, NOW),
            WindowVerdict::DeadZone { latest: 12.0 }
        );
    }

    #[test]
    fn survival_world_needs_five_periods() {
        let policy = StepScalingPolicy {
            low_threshold: 15.0,
            evaluation_periods: 5,
            ..StepScalingPolicy::default()
        };
        assert!(matches!(
            evaluate_window(&policy, &samples(&[14.0, 14.0, 14.0, 14.0]), NOW),
            WindowVerdict::NoData { .. }
        ));
        assert!(matches!(
            evaluate_window(&policy, &samples(&[14.0; 5]), NOW),
            WindowVerdict::BelowThreshold { .. }
        ));
    }
}
