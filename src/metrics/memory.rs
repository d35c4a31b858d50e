//! Physical memory totals from /proc/meminfo.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SourceUnavailableError;

const PROC_MEMINFO: &str = "/proc/meminfo";
const KB_PER_GB: f64 = 1024.0 * 1024.0;

/// Raw physical memory counters in kB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhysicalMemory {
    pub total_kb: u64,
    pub free_kb: u64,
}

/// OS query for physical memory counters.
pub trait MemorySource: Send + Sync {
    fn physical_memory(&self) -> Result<PhysicalMemory, SourceUnavailableError>;
}

/// Memory source backed by /proc/meminfo.
#[derive(Debug, Clone)]
pub struct MemInfo {
    path: PathBuf,
}

impl MemInfo {
    pub fn new() -> Self {
        Self::at(PROC_MEMINFO)
    }

    pub fn at<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Default for MemInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource for MemInfo {
    fn physical_memory(&self) -> Result<PhysicalMemory, SourceUnavailableError> {
        let meminfo = fs::read_to_string(&self.path).map_err(|source| SourceUnavailableError::Io {
            path: self.path.display().to_string(),
            source,
        })?;

        parse_meminfo(&meminfo)
    }
}

fn parse_meminfo(meminfo: &str) -> Result<PhysicalMemory, SourceUnavailableError> {
    let mut total: Option<u64> = None;
    let mut free: Option<u64> = None;
    let mut available: Option<u64> = None;

    for line in meminfo.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        let value = parts[1].parse().ok();
        match parts[0] {
            "MemTotal:" => total = value,
            "MemFree:" => free = value,
            "MemAvailable:" => available = value,
            _ => {}
        }
    }

    // MemAvailable counts reclaimable page cache as free; older kernels lack it.
    match (total, available.or(free)) {
        (Some(total_kb), Some(free_kb)) => Ok(PhysicalMemory { total_kb, free_kb }),
        _ => Err(SourceUnavailableError::Parse {
            what: "MemTotal/MemAvailable",
            input: meminfo.lines().take(3).collect::<Vec<_>>().join(" | "),
        }),
    }
}

/// RAM totals in GB, rounded to 2 decimals.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RamInfo {
    pub total_gb: f64,
    pub used_gb: f64,
}

impl From<PhysicalMemory> for RamInfo {
    fn from(memory: PhysicalMemory) -> Self {
        let used_kb = memory.total_kb.saturating_sub(memory.free_kb);
        Self {
            total_gb: round2(memory.total_kb as f64 / KB_PER_GB),
            used_gb: round2(used_kb as f64 / KB_PER_GB),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// RAM reader. Uncached: the query is a cheap file read.
pub struct RamReader {
    source: Arc<dyn MemorySource>,
}

impl RamReader {
    pub fn new(source: Arc<dyn MemorySource>) -> Self {
        Self { source }
    }

    /// Total and used RAM, zeros on any fault.
    pub fn read(&self) -> RamInfo {
        match self.source.physical_memory() {
            Ok(memory) => {
                let info = RamInfo::from(memory);
                debug!("RAM: {:.2} GB used of {:.2} GB", info.used_gb, info.total_gb);
                info
            }
            Err(error) => {
                warn!("Failed to fetch RAM usage: {error}");
                RamInfo::default()
            }
        }
    }
}
