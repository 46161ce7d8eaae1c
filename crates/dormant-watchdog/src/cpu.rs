//! CPU utilization from `/proc/stat` counter deltas.

use std::path::PathBuf;

use crate::error::ProbeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

/// Busy percentage between consecutive calls to [`CpuSampler::sample`].
#[derive(Debug)]
pub struct CpuSampler {
    path: PathBuf,
    last: Option<CpuTimes>,
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSampler {
    pub fn new() -> Self {
        Self::with_path("/proc/stat")
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: None,
        }
    }

    /// Utilization in percent since the previous call.
    ///
    /// The first call only primes the counters and returns `None`.
    pub fn sample(&mut self) -> Result<Option<f64>, ProbeError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| ProbeError::Io {
            path: self.path.clone(),
            source,
        })?;
        let current = parse_cpu_times(&content)?;
        let previous = self.last.replace(current);
        Ok(previous.and_then(|prev| utilization(prev, current)))
    }
}

fn parse_cpu_times(stat: &str) -> Result<CpuTimes, ProbeError> {
    let line = stat
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| ProbeError::Parse {
            what: "/proc/stat",
            line: stat.lines().next().unwrap_or_default().to_string(),
        })?;

    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|_| ProbeError::Parse {
            what: "/proc/stat cpu line",
            line: line.to_string(),
        })?;
    if values.len() < 4 {
        return Err(ProbeError::Parse {
            what: "/proc/stat cpu line",
            line: line.to_string(),
        });
    }

    // user nice system idle iowait irq softirq steal; guest time is
    // already counted in user.
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    let total = values.iter().take(8).sum();
    Ok(CpuTimes { idle, total })
}

fn utilization(prev: CpuTimes, current: CpuTimes) -> Option<f64> {
    let total = current.total.checked_sub(prev.total)?;
    let idle = current.idle.checked_sub(prev.idle)?;
    if total == 0 {
        return None;
    }
    let busy = total.saturating_sub(idle);
    Some((busy as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aggregate_line() {
        let stat = "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 50 0 25 400 25 0 0 0 0 0\nintr 1\n";
        let times = parse_cpu_times(stat).unwrap();
        assert_eq!(times, CpuTimes { idle: 850, total: 1000 });
    }

    #[test]
    fn utilization_from_delta() {
        let a = CpuTimes { idle: 850, total: 1000 };
        let b = CpuTimes { idle: 1750, total: 2000 };
        // 100 busy jiffies out of 1000.
        assert_eq!(utilization(a, b), Some(10.0));
        assert_eq!(utilization(b, b), None);
        // Counter reset.
        assert_eq!(utilization(b, a), None);
    }

    #[test]
    fn sampler_primes_then_reports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stat");
        std::fs::write(&path, "cpu  100 0 50 800 50 0 0 0 0 0\n").unwrap();

        let mut sampler = CpuSampler::with_path(&path);
        assert_eq!(sampler.sample().unwrap(), None);

        std::fs::write(&path, "cpu  500 0 150 1250 100 0 0 0 0 0\n").unwrap();
        // busy +500, idle +500.
        assert_eq!(sampler.sample().unwrap(), Some(50.0));
    }

    #[test]
    fn missing_cpu_line_is_an_error() {
        assert!(parse_cpu_times("intr 1\n").is_err());
    }
}
