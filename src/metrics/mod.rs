//! Metric readers, one per resource family.

pub mod cpu;
pub mod gpu;
pub mod memory;
pub mod storage;

pub use cpu::{CpuReader, ProcStatCounter, ProcessorCounter};
pub use gpu::{FaultPolicy, GpuReader, NvidiaSmi};
pub use memory::{MemInfo, RamInfo, RamReader};
pub use storage::{MountTable, StorageInfo, StorageReader};
