use crate::dimension::Dimension;
use rxtune_sys::{CpuSampleError, EthtoolError, MsrError, XdpError};
use thiserror::Error;

/// Why a measurement window could not produce a usable sample. These are
/// recoverable: the step is abandoned and the controller moves on.
#[derive(Debug, Error)]
pub enum MeasurementError {
    #[error("Unable to read interface counters: {0}")]
    Counters(#[source] EthtoolError),
    #[error("Counter {0} is not reported by the driver")]
    MissingCounter(String),
    #[error("Counter {0} went backwards")]
    CounterWentBackwards(String),
    #[error("No time elapsed between counter samples")]
    ZeroElapsed,
    #[error("Unable to sample CPU usage: {0}")]
    CpuSample(#[from] CpuSampleError),
    #[error("No cores carry any RSS weight")]
    NoActiveCores,
}

/// A failed write to the interface, the power-state register or the
/// XDP attachment. Always fatal.
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("{op} failed: {source}")]
    Nic {
        op: &'static str,
        #[source]
        source: EthtoolError,
    },
    #[error("Unable to set power state {value:#x}: {source}")]
    PowerState {
        value: u64,
        #[source]
        source: MsrError,
    },
    #[error("Core weights are all zero, refusing to write an empty indirection table")]
    EmptyWeights,
    #[error(transparent)]
    Xdp(#[from] XdpError),
}

/// Everything that can stop a tuning step.
#[derive(Debug, Error)]
pub enum TunerError {
    #[error("Hardware failure: {0}")]
    Hardware(#[from] HardwareError),
    #[error("Inconclusive measurement: {0}")]
    Measurement(#[from] MeasurementError),
    #[error("{value} is not a legal {dimension} setting")]
    IllegalSetting { dimension: Dimension, value: u64 },
}

impl TunerError {
    /// Measurement problems are retried on the next step; everything else
    /// stops the tuner.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TunerError::Measurement(_))
    }
}

/// Shorthand for mapping an ethtool failure to a fatal error naming the
/// operation that was attempted.
pub(crate) fn nic_op(op: &'static str) -> impl FnOnce(EthtoolError) -> HardwareError {
    move |source| HardwareError::Nic { op, source }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_measurements_are_recoverable() {
        let measurement: TunerError = MeasurementError::NoActiveCores.into();
        assert!(!measurement.is_fatal());
        let hardware: TunerError = HardwareError::EmptyWeights.into();
        assert!(hardware.is_fatal());
        let illegal = TunerError::IllegalSetting {
            dimension: Dimension::RxQueueDepth,
            value: 1000,
        };
        assert!(illegal.is_fatal());
        assert_eq!(illegal.to_string(), "1000 is not a legal RX queue depth setting");
    }
}
