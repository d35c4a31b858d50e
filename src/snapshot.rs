//! Bounded metric model: one consistent set of host usage readings.

use serde::Serialize;

use crate::error::OutOfRangeError;

const PERCENT_MIN: f64 = 0.0;
const PERCENT_MAX: f64 = 100.0;

/// Point-in-time host resource usage.
///
/// Every field is range checked by [`SnapshotBuilder`]; once built the
/// snapshot cannot be modified.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// CPU utilization percentage (0-100)
    cpu_usage: f64,
    /// GPU utilization percentage (0-100)
    gpu_usage: f64,
    /// Total storage in GB
    total_storage: f64,
    /// Available storage in GB, never above `total_storage`
    available_storage: f64,
    /// Total RAM in GB
    total_ram: f64,
    /// Used RAM in GB, never above `total_ram`
    used_ram: f64,
}

impl Snapshot {
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    pub fn cpu_usage(&self) -> f64 {
        self.cpu_usage
    }

    pub fn gpu_usage(&self) -> f64 {
        self.gpu_usage
    }

    pub fn total_storage(&self) -> f64 {
        self.total_storage
    }

    pub fn available_storage(&self) -> f64 {
        self.available_storage
    }

    pub fn total_ram(&self) -> f64 {
        self.total_ram
    }

    pub fn used_ram(&self) -> f64 {
        self.used_ram
    }

    /// Used storage in GB
    pub fn used_storage(&self) -> f64 {
        self.total_storage - self.available_storage
    }

    /// Percentage of RAM still available, 0 when the total is unknown
    pub fn available_ram_percentage(&self) -> f64 {
        if self.total_ram > 0.0 {
            100.0 * (1.0 - self.used_ram / self.total_ram)
        } else {
            0.0
        }
    }
}

/// Field-by-field constructor for [`Snapshot`].
///
/// Setters consume the builder, so a rejected value drops the whole
/// half-built snapshot. `total_storage` and `total_ram` must be set before
/// `available_storage` and `used_ram`: the dependent field is checked
/// against whatever total is set at that moment (0 if none).
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    inner: Snapshot,
}

impl SnapshotBuilder {
    pub fn cpu_usage(mut self, value: f64) -> Result<Self, OutOfRangeError> {
        self.inner.cpu_usage = check("cpuUsage", value, PERCENT_MIN, PERCENT_MAX)?;
        Ok(self)
    }

    pub fn gpu_usage(mut self, value: f64) -> Result<Self, OutOfRangeError> {
        self.inner.gpu_usage = check("gpuUsage", value, PERCENT_MIN, PERCENT_MAX)?;
        Ok(self)
    }

    pub fn total_storage(mut self, value: f64) -> Result<Self, OutOfRangeError> {
        self.inner.total_storage = check("totalStorage", value, 0.0, f64::MAX)?;
        Ok(self)
    }

    pub fn available_storage(mut self, value: f64) -> Result<Self, OutOfRangeError> {
        let total = self.inner.total_storage;
        self.inner.available_storage = check("availableStorage", value, 0.0, total)?;
        Ok(self)
    }

    pub fn total_ram(mut self, value: f64) -> Result<Self, OutOfRangeError> {
        self.inner.total_ram = check("totalRam", value, 0.0, f64::MAX)?;
        Ok(self)
    }

    pub fn used_ram(mut self, value: f64) -> Result<Self, OutOfRangeError> {
        let total = self.inner.total_ram;
        self.inner.used_ram = check("usedRam", value, 0.0, total)?;
        Ok(self)
    }

    pub fn build(self) -> Snapshot {
        self.inner
    }
}

// NaN fails the range test as well as anything outside it.
fn check(field: &'static str, value: f64, min: f64, max: f64) -> Result<f64, OutOfRangeError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(OutOfRangeError {
            field,
            value,
            min,
            max,
        })
    }
}
