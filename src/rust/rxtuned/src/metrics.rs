//! Turns counter snapshots and CPU samples into one windowed sample.

use crate::error::MeasurementError;
use crate::nic_config::NicConfig;
use rxtune_sys::{CpuSampler, Nic, Pacer};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// CPU usage is always averaged over this window.
pub const CPU_WINDOW: Duration = Duration::from_secs(1);

/// One measurement of the live configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Packets per second handled by the action under test
    pub throughput: u64,
    /// Packets per second received but not handled
    pub unprocessed: u64,
    /// Mean busy percentage over the weighted cores
    pub cpu: f64,
}

/// Per-second rates of the two counters over one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRates {
    pub action: u64,
    pub total: u64,
}

impl CounterRates {
    pub fn unprocessed(&self) -> u64 {
        self.total.saturating_sub(self.action)
    }
}

/// Snapshots both counters, waits `interval`, snapshots again.
pub fn counter_rates<P: Nic + Pacer + ?Sized>(
    platform: &mut P,
    config: &NicConfig,
    interval: Duration,
) -> Result<CounterRates, MeasurementError> {
    let before = platform
        .statistics(&config.iface)
        .map_err(MeasurementError::Counters)?;
    let elapsed = platform.settle(interval);
    let after = platform
        .statistics(&config.iface)
        .map_err(MeasurementError::Counters)?;

    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return Err(MeasurementError::ZeroElapsed);
    }
    Ok(CounterRates {
        action: rate(&before, &after, &config.action_metric, secs)?,
        total: rate(&before, &after, &config.total_metric, secs)?,
    })
}

fn rate(
    before: &HashMap<String, u64>,
    after: &HashMap<String, u64>,
    key: &str,
    secs: f64,
) -> Result<u64, MeasurementError> {
    let missing = || MeasurementError::MissingCounter(key.to_string());
    let start = *before.get(key).ok_or_else(missing)?;
    let end = *after.get(key).ok_or_else(missing)?;
    let delta = end
        .checked_sub(start)
        .ok_or_else(|| MeasurementError::CounterWentBackwards(key.to_string()))?;
    Ok((delta as f64 / secs) as u64)
}

/// Mean of `samples` over the cores whose weight is non-zero. Cores the
/// sampler did not report are ignored.
pub fn average_cpu(samples: &[f64], weights: &[u32]) -> Result<f64, MeasurementError> {
    let (sum, count) = samples
        .iter()
        .zip(weights)
        .filter(|(_, weight)| **weight > 0)
        .fold((0.0, 0usize), |(sum, count), (pct, _)| (sum + pct, count + 1));
    if count == 0 {
        return Err(MeasurementError::NoActiveCores);
    }
    Ok(sum / count as f64)
}

/// Samples every core over [`CPU_WINDOW`].
pub fn per_core_cpu<P: CpuSampler + ?Sized>(platform: &mut P) -> Result<Vec<f64>, MeasurementError> {
    Ok(platform.sample(CPU_WINDOW)?)
}

/// Average CPU usage of the cores currently servicing the interface.
pub fn active_cpu<P: CpuSampler + ?Sized>(
    platform: &mut P,
    config: &NicConfig,
) -> Result<f64, MeasurementError> {
    let samples = per_core_cpu(platform)?;
    average_cpu(&samples, &config.core_weights)
}

/// Measures the live configuration: counter rates over `interval`, then
/// CPU over [`CPU_WINDOW`].
pub fn measure<P: Nic + Pacer + CpuSampler + ?Sized>(
    platform: &mut P,
    config: &NicConfig,
    interval: Duration,
) -> Result<Sample, MeasurementError> {
    let rates = counter_rates(platform, config, interval)?;
    let cpu = active_cpu(platform, config)?;
    let sample = Sample {
        throughput: rates.action,
        unprocessed: rates.unprocessed(),
        cpu,
    };
    debug!(
        "{}={} pps, unprocessed={} pps, CPU={:.2}%",
        config.action_metric, sample.throughput, sample.unprocessed, sample.cpu
    );
    Ok(sample)
}
