use std::time::{Duration, Instant};
use sysinfo::System;
use thiserror::Error;
use tracing::error;

/// Samples CPU utilisation, one percentage per logical core.
pub trait CpuSampler {
    /// Blocks for `window` and returns each core's busy percentage over it.
    fn sample(&mut self, window: Duration) -> Result<Vec<f64>, CpuSampleError>;
}

/// Waits out a settle interval between counter snapshots.
pub trait Pacer {
    /// Blocks for `interval` and returns the time that actually elapsed.
    fn settle(&mut self, interval: Duration) -> Duration;
}

/// `CpuSampler` backed by `sysinfo`, which differences `/proc/stat`
/// between two refreshes.
pub struct SysinfoSampler {
    sys: System,
}

impl SysinfoSampler {
    /// Creates a sampler and primes the first `/proc/stat` reading.
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        Self { sys }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSampler for SysinfoSampler {
    fn sample(&mut self, window: Duration) -> Result<Vec<f64>, CpuSampleError> {
        self.sys.refresh_cpu_usage();
        std::thread::sleep(window);
        self.sys.refresh_cpu_usage();

        let usage: Vec<f64> = self
            .sys
            .cpus()
            .iter()
            .map(|cpu| cpu.cpu_usage() as f64)
            .collect();
        if usage.is_empty() {
            error!("sysinfo reported no CPUs");
            return Err(CpuSampleError::NoCpus);
        }
        if usage.iter().any(|pct| !pct.is_finite()) {
            return Err(CpuSampleError::InvalidReading);
        }
        Ok(usage)
    }
}

/// `Pacer` that sleeps the calling thread.
#[derive(Default)]
pub struct SleepPacer;

impl Pacer for SleepPacer {
    fn settle(&mut self, interval: Duration) -> Duration {
        let start = Instant::now();
        std::thread::sleep(interval);
        start.elapsed()
    }
}

/// Errors from CPU sampling.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CpuSampleError {
    /// No CPUs were visible
    #[error("No CPUs found while sampling utilisation")]
    NoCpus,
    /// A core reported a NaN or infinite percentage
    #[error("CPU utilisation sample was not a finite number")]
    InvalidReading,
}
