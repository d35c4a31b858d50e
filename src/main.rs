//! CoolPanel API - point-in-time host resource usage over HTTP.
//!
//! Serves CPU, GPU, RAM and storage usage as one JSON snapshot per request.
//! CPU and GPU are sampled concurrently; GPU and storage readings are cached
//! for a short TTL.

mod aggregator;
mod cache;
mod error;
mod logging;
mod metrics;
mod server;
mod snapshot;

use std::sync::Arc;
use std::time::Duration;

use aggregator::SnapshotAggregator;
use anyhow::Result;
use cache::{SystemClock, TtlCache};
use clap::Parser;
use metrics::{
    CpuReader, FaultPolicy, GpuReader, MemInfo, MountTable, NvidiaSmi, ProcStatCounter,
    ProcessorCounter, RamReader, StorageInfo, StorageReader,
};
use tracing::{info, warn};

/// Host resource usage API
#[derive(Parser, Debug)]
#[command(name = "coolpanel-api")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address the HTTP server binds to
    #[arg(short, long, default_value = "0.0.0.0:5000")]
    address: String,

    /// Only report storage for the first volume whose mount point starts
    /// with this prefix (case-insensitive)
    #[arg(short, long)]
    drive: Option<String>,

    /// Seconds a GPU or storage reading is reused before re-querying
    #[arg(long, default_value_t = cache::DEFAULT_TTL.as_secs())]
    cache_ttl: u64,

    /// CPU sampling wait per request, in milliseconds
    #[arg(long, default_value_t = metrics::cpu::DEFAULT_SAMPLE_INTERVAL.as_millis() as u64)]
    cpu_sample_ms: u64,

    /// GPU query executable, resolved on PATH
    #[arg(long, default_value = metrics::gpu::DEFAULT_GPU_COMMAND)]
    gpu_command: String,

    /// Re-query the GPU on the next request after a failure instead of
    /// caching the fallback value
    #[arg(long)]
    gpu_retry_faults: bool,

    /// Enable debug logs
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn build_aggregator(&self) -> SnapshotAggregator {
        let ttl = Duration::from_secs(self.cache_ttl);
        let clock = Arc::new(SystemClock);

        // The counter lives for the whole process and is shared by all requests.
        let counter = match ProcStatCounter::open() {
            Ok(counter) => Some(Arc::new(counter) as Arc<dyn ProcessorCounter>),
            Err(error) => {
                warn!("CPU counter unavailable, CPU usage will read 0: {error}");
                None
            }
        };

        let fault_policy = if self.gpu_retry_faults {
            FaultPolicy::Retry
        } else {
            FaultPolicy::Cache
        };

        SnapshotAggregator::new(
            CpuReader::new(counter, Duration::from_millis(self.cpu_sample_ms)),
            GpuReader::new(
                Arc::new(NvidiaSmi::new(self.gpu_command.clone())),
                TtlCache::new(0.0, ttl, clock.clone()),
                fault_policy,
            ),
            StorageReader::new(
                Arc::new(MountTable::new()),
                self.drive.clone(),
                TtlCache::new(StorageInfo::default(), ttl, clock),
            ),
            RamReader::new(Arc::new(MemInfo::new())),
        )
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose)?;

    info!(
        "Starting {} {} with {:?}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        args
    );

    let aggregator = args.build_aggregator();
    server::run(&args.address, aggregator).await?;

    Ok(())
}
