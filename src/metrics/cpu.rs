//! CPU utilization from the aggregate line of /proc/stat.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::SourceUnavailableError;

/// Minimum wait between two samples for a meaningful delta.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

const PROC_STAT: &str = "/proc/stat";

/// Raw CPU time values from /proc/stat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }
}

/// A live processor time counter.
///
/// Samples are cumulative, so utilization is the difference between two of
/// them. The counter keeps no state between calls and may be sampled by any
/// number of readers at once.
pub trait ProcessorCounter: Send + Sync {
    fn sample(&self) -> Result<CpuTimes, SourceUnavailableError>;
}

/// Processor counter backed by /proc/stat.
#[derive(Debug, Clone)]
pub struct ProcStatCounter {
    path: PathBuf,
}

impl ProcStatCounter {
    /// Open the system counter and check it can be sampled.
    pub fn open() -> Result<Self, SourceUnavailableError> {
        Self::open_at(PROC_STAT)
    }

    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self, SourceUnavailableError> {
        let counter = Self {
            path: path.as_ref().to_path_buf(),
        };
        counter.sample()?;
        Ok(counter)
    }
}

impl ProcessorCounter for ProcStatCounter {
    fn sample(&self) -> Result<CpuTimes, SourceUnavailableError> {
        let content = fs::read_to_string(&self.path).map_err(|source| SourceUnavailableError::Io {
            path: self.path.display().to_string(),
            source,
        })?;

        content
            .lines()
            .find(|line| line.starts_with("cpu "))
            .map(parse_cpu_line)
            .ok_or_else(|| SourceUnavailableError::Parse {
                what: "aggregate cpu line",
                input: content.lines().next().unwrap_or_default().to_string(),
            })
    }
}

fn parse_cpu_line(line: &str) -> CpuTimes {
    let parts: Vec<u64> = line
        .split_whitespace()
        .skip(1) // Skip "cpu"
        .filter_map(|s| s.parse().ok())
        .collect();

    CpuTimes {
        user: *parts.first().unwrap_or(&0),
        nice: *parts.get(1).unwrap_or(&0),
        system: *parts.get(2).unwrap_or(&0),
        idle: *parts.get(3).unwrap_or(&0),
        iowait: *parts.get(4).unwrap_or(&0),
        irq: *parts.get(5).unwrap_or(&0),
        softirq: *parts.get(6).unwrap_or(&0),
        steal: *parts.get(7).unwrap_or(&0),
    }
}

/// Busy share of the elapsed jiffies, in percent.
fn calculate_utilization(prev: &CpuTimes, curr: &CpuTimes) -> f64 {
    let total_delta = curr.total().saturating_sub(prev.total());
    if total_delta == 0 {
        return 0.0;
    }

    let idle_delta = curr.idle_total().saturating_sub(prev.idle_total());
    let utilization = 100.0 * (1.0 - (idle_delta as f64 / total_delta as f64));
    utilization.clamp(0.0, 100.0)
}

/// CPU reader: samples the shared counter on both ends of its own
/// sampling interval.
pub struct CpuReader {
    counter: Option<Arc<dyn ProcessorCounter>>,
    sample_interval: Duration,
}

impl CpuReader {
    /// `counter` is `None` when the host counter could not be opened; every
    /// read then falls back to 0.
    pub fn new(counter: Option<Arc<dyn ProcessorCounter>>, sample_interval: Duration) -> Self {
        Self {
            counter,
            sample_interval,
        }
    }

    /// CPU utilization percentage, 0.0 on any fault.
    pub async fn read(&self) -> f64 {
        match self.try_read().await {
            Ok(value) => {
                debug!("CPU usage: {value:.2}%");
                value
            }
            Err(error) => {
                warn!("Failed to fetch CPU usage: {error}");
                0.0
            }
        }
    }

    async fn try_read(&self) -> Result<f64, SourceUnavailableError> {
        let counter = self
            .counter
            .as_ref()
            .ok_or(SourceUnavailableError::Missing("processor counter"))?;

        let start = counter.sample()?;
        tokio::time::sleep(self.sample_interval).await;
        let end = counter.sample()?;

        Ok(calculate_utilization(&start, &end))
    }
}


#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tracing_test::traced_test;

    use super::*;

    const STAT_SAMPLE: &str = "cpu  4705 356 584 3699 23 23 0 0 0 0\n\
                               cpu0 1393 280 286 1752 12 19 0 0 0 0\n\
                               intr 1462898\n\
                               ctxt 1990473\n";

    fn write_stat(file: &tempfile::NamedTempFile, content: &str) {
        fs::write(file.path(), content).unwrap();
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    struct BrokenCounter;

    impl ProcessorCounter for BrokenCounter {
        fn sample(&self) -> Result<CpuTimes, SourceUnavailableError> {
            Err(SourceUnavailableError::Missing("processor counter"))
        }
    }

    #[test]
    fn test_parse_cpu_line() {
        let times = parse_cpu_line("cpu  4705 356 584 3699 23 23 0 7 0 0");
        assert_eq!(times.user, 4705);
        assert_eq!(times.nice, 356);
        assert_eq!(times.system, 584);
        assert_eq!(times.idle, 3699);
        assert_eq!(times.iowait, 23);
        assert_eq!(times.irq, 23);
        assert_eq!(times.softirq, 0);
        assert_eq!(times.steal, 7);
    }

    #[test]
    fn test_parse_short_cpu_line() {
        let times = parse_cpu_line("cpu 10 0 5 85");
        assert_eq!(times.total(), 100);
        assert_eq!(times.idle_total(), 85);
    }

    #[test]
    fn test_calculate_utilization() {
        let prev = CpuTimes {
            user: 100,
            idle: 900,
            ..Default::default()
        };
        let curr = CpuTimes {
            user: 130,
            system: 10,
            idle: 960,
            ..Default::default()
        };
        // 100 jiffies elapsed, 60 of them idle
        assert_close(calculate_utilization(&prev, &curr), 40.0);
    }

    #[test]
    fn test_calculate_utilization_without_progress() {
        let times = CpuTimes {
            user: 100,
            idle: 900,
            ..Default::default()
        };
        assert_eq!(calculate_utilization(&times, &times), 0.0);
    }

    #[test]
    fn test_calculate_utilization_counter_reset() {
        let prev = CpuTimes {
            idle: 1_000,
            user: 1_000,
            ..Default::default()
        };
        let curr = CpuTimes {
            idle: 10,
            user: 5_000,
            ..Default::default()
        };
        let value = calculate_utilization(&prev, &curr);
        assert!((0.0..=100.0).contains(&value));
    }

    #[test]
    fn test_proc_stat_counter_sample() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_stat(&file, STAT_SAMPLE);

        let counter = ProcStatCounter::open_at(file.path()).unwrap();
        let times = counter.sample().unwrap();
        assert_eq!(times.user, 4705);
        assert_eq!(times.idle_total(), 3722);
        // Sampling does not consume anything.
        assert_eq!(counter.sample().unwrap(), times);
    }

    #[test]
    fn test_proc_stat_counter_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ProcStatCounter::open_at(dir.path().join("stat"));
        assert!(matches!(result, Err(SourceUnavailableError::Io { .. })));
    }

    #[test]
    fn test_proc_stat_counter_without_cpu_line() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_stat(&file, "intr 1462898\nctxt 1990473\n");
        let result = ProcStatCounter::open_at(file.path());
        assert!(matches!(result, Err(SourceUnavailableError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_read_waits_sample_interval() {
        let reader = CpuReader::new(
            Some(test_counter::SteadyCounter::new(42.5)),
            Duration::from_millis(50),
        );

        let start = Instant::now();
        assert_close(reader.read().await, 42.5);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_read_measures_its_own_interval() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_stat(&file, STAT_SAMPLE);
        let counter: Arc<dyn ProcessorCounter> =
            Arc::new(ProcStatCounter::open_at(file.path()).unwrap());

        let interval = Duration::from_millis(200);
        let first = CpuReader::new(Some(counter.clone()), interval);
        let second = CpuReader::new(Some(counter), interval);

        // Both reads start before the update and end after it, the second
        // one slightly later than the first.
        let (a, b, ()) = tokio::join!(
            first.read(),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                second.read().await
            },
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                write_stat(
                    &file,
                    "cpu  4765 356 604 3719 23 23 0 0 0 0\nctxt 1990999\n",
                );
            },
        );

        // 100 jiffies elapsed, 20 idle
        assert_close(a, 80.0);
        assert_close(b, 80.0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_read_falls_back_on_fault() {
        let reader = CpuReader::new(Some(Arc::new(BrokenCounter)), Duration::ZERO);
        assert_eq!(reader.read().await, 0.0);
        assert!(logs_contain("Failed to fetch CPU usage"));
    }

    #[tokio::test]
    async fn test_read_without_counter() {
        let reader = CpuReader::new(None, Duration::ZERO);
        assert_eq!(reader.read().await, 0.0);
    }
}
