//! GPU utilization from the vendor query tool, cached for one TTL window.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::cache::TtlCache;
use crate::error::SourceUnavailableError;

pub const DEFAULT_GPU_COMMAND: &str = "nvidia-smi";

const NVIDIA_SMI_ARGS: [&str; 2] = [
    "--query-gpu=utilization.gpu",
    "--format=csv,noheader,nounits",
];

/// Something that can report the current GPU utilization percentage.
#[async_trait]
pub trait GpuQuery: Send + Sync {
    async fn utilization(&self) -> Result<f64, SourceUnavailableError>;
}

/// Queries `nvidia-smi` (or a compatible tool) for the first GPU's utilization.
#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    program: String,
    args: Vec<String>,
}

impl NvidiaSmi {
    /// `program` is resolved on `PATH`.
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_args(program, NVIDIA_SMI_ARGS)
    }

    pub fn with_args<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl GpuQuery for NvidiaSmi {
    async fn utilization(&self) -> Result<f64, SourceUnavailableError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SourceUnavailableError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SourceUnavailableError::ExitStatus {
                program: self.program.clone(),
                status: output.status.to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_utilization(stdout.lines().next().unwrap_or_default())
    }
}

/// Parse one line of `--format=csv,noheader,nounits` output.
fn parse_utilization(line: &str) -> Result<f64, SourceUnavailableError> {
    let trimmed = line.trim();
    match trimmed.parse::<f64>() {
        Ok(value) if (0.0..=100.0).contains(&value) => Ok(value),
        _ => Err(SourceUnavailableError::Parse {
            what: "GPU utilization",
            input: trimmed.to_string(),
        }),
    }
}

/// What a GPU query fault does to the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FaultPolicy {
    /// Store the 0.0 fallback like a real reading, suppressing further
    /// queries for one TTL window.
    #[default]
    Cache,
    /// Leave the cache untouched so the next call queries again.
    Retry,
}

/// GPU reader with a single-slot TTL cache in front of the query tool.
pub struct GpuReader {
    query: Arc<dyn GpuQuery>,
    cache: TtlCache<f64>,
    fault_policy: FaultPolicy,
}

impl GpuReader {
    pub fn new(query: Arc<dyn GpuQuery>, cache: TtlCache<f64>, fault_policy: FaultPolicy) -> Self {
        Self {
            query,
            cache,
            fault_policy,
        }
    }

    /// GPU utilization percentage, 0.0 on any fault.
    pub async fn read(&self) -> f64 {
        if let Some(value) = self.cache.fresh() {
            trace!("GPU usage served from cache: {value}");
            return value;
        }

        match self.query.utilization().await {
            Ok(value) => {
                debug!("GPU usage: {value}%");
                self.cache.store(value);
                value
            }
            Err(error) => {
                warn!("Failed to fetch GPU usage: {error}");
                if self.fault_policy == FaultPolicy::Cache {
                    self.cache.store(0.0);
                }
                0.0
            }
        }
    }
}
