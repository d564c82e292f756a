use crate::applier::apply_setting;
use crate::dimension::{CandidateOrigin, Dimension, Setting};
use crate::error::TunerError;
use crate::metrics::{measure, Sample};
use crate::nic_config::NicConfig;
use crate::platform::Platform;
use std::time::Duration;
use tracing::debug;

/// A measured setting for one dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub setting: Setting,
    pub origin: CandidateOrigin,
    pub throughput: u64,
    pub cpu: f64,
    pub unprocessed: u64,
}

impl Candidate {
    fn new(setting: Setting, origin: CandidateOrigin, sample: Sample) -> Self {
        Self {
            setting,
            origin,
            throughput: sample.throughput,
            cpu: sample.cpu,
            unprocessed: sample.unprocessed,
        }
    }
}

/// Measured candidates for one dimension, current first. `config` holds
/// whichever probe was applied last, which is also what the hardware has.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub dimension: Dimension,
    pub candidates: Vec<Candidate>,
    pub config: NicConfig,
}

/// Measures the current setting of `dimension`, then applies and measures
/// each neighbour in turn.
pub fn evaluate<P: Platform + ?Sized>(
    platform: &mut P,
    dimension: Dimension,
    mut config: NicConfig,
    interval: Duration,
    power_values: [u64; 2],
) -> Result<Evaluation, TunerError> {
    let probes = dimension.probes(&config, power_values)?;
    let current = dimension.current(&config);

    let mut candidates = Vec::with_capacity(probes.len() + 1);
    let sample = measure(platform, &config, interval)?;
    debug!("{dimension}: current {current} -> {sample:?}");
    candidates.push(Candidate::new(current, CandidateOrigin::Current, sample));

    for (origin, setting) in probes {
        setting.write_to(&mut config);
        apply_setting(platform, &config, setting)?;
        let sample = measure(platform, &config, interval)?;
        debug!("{dimension}: {origin} {setting} -> {sample:?}");
        candidates.push(Candidate::new(setting, origin, sample));
    }

    Ok(Evaluation {
        dimension,
        candidates,
        config,
    })
}
