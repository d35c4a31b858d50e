//! Joins the four readers into one snapshot.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument};

use crate::error::AggregationError;
use crate::metrics::{CpuReader, GpuReader, RamInfo, RamReader, StorageInfo, StorageReader};
use crate::snapshot::Snapshot;

pub struct SnapshotAggregator {
    cpu: Arc<CpuReader>,
    gpu: Arc<GpuReader>,
    storage: StorageReader,
    ram: RamReader,
}

impl SnapshotAggregator {
    pub fn new(cpu: CpuReader, gpu: GpuReader, storage: StorageReader, ram: RamReader) -> Self {
        Self {
            cpu: Arc::new(cpu),
            gpu: Arc::new(gpu),
            storage,
            ram,
        }
    }

    /// Capture one snapshot.
    ///
    /// CPU and GPU are sampled concurrently on their own tasks while storage
    /// and RAM are read inline; the call completes when both tasks do. There
    /// is no timeout: a hung GPU tool stalls the capture.
    #[instrument(level = "debug", skip(self))]
    pub async fn capture_snapshot(&self) -> Result<Snapshot, AggregationError> {
        let start = Instant::now();

        let cpu = self.cpu.clone();
        let cpu_task = tokio::spawn(async move { cpu.read().await });
        let gpu = self.gpu.clone();
        let gpu_task = tokio::spawn(async move { gpu.read().await });

        let storage = self.storage.read();
        let ram = self.ram.read();

        let (cpu_usage, gpu_usage) = tokio::join!(cpu_task, gpu_task);
        let cpu_usage = cpu_usage.map_err(|source| AggregationError::ReaderTask {
            reader: "CPU",
            source,
        })?;
        let gpu_usage = gpu_usage.map_err(|source| AggregationError::ReaderTask {
            reader: "GPU",
            source,
        })?;

        let snapshot = assemble(cpu_usage, gpu_usage, storage, ram)?;
        debug!("Captured snapshot in {:?}: {snapshot:?}", start.elapsed());

        Ok(snapshot)
    }
}

/// Totals go in before the values bounded by them.
fn assemble(
    cpu_usage: f64,
    gpu_usage: f64,
    storage: StorageInfo,
    ram: RamInfo,
) -> Result<Snapshot, AggregationError> {
    let snapshot = Snapshot::builder()
        .cpu_usage(cpu_usage)?
        .gpu_usage(gpu_usage)?
        .total_storage(storage.total_gb)?
        .available_storage(storage.available_gb)?
        .total_ram(ram.total_gb)?
        .used_ram(ram.used_gb)?
        .build();

    Ok(snapshot)
}
