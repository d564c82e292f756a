//! rxtune: online tuning of a NIC's receive path.
//!
//! The tuner walks a fixed set of driver settings (RX ring depth, TX
//! budget, CQE compression, striding RQ, processor power state), probing
//! each setting's neighbours under live traffic and keeping whichever
//! processes every packet for the least CPU. Optionally, it also grows or
//! shrinks the set of cores RSS spreads traffic over.

mod applier;
mod config;
mod controller;
mod datalog;
mod dimension;
mod error;
mod evaluator;
mod file_lock;
mod metrics;
#[cfg(test)]
mod mock;
mod nic_config;
mod platform;
mod rebalancer;
mod selection;

pub use applier::{apply, apply_indirection, apply_power_state, CQE_COMPRESS_FLAG, RX_STRIDING_FLAG};
pub use config::{configure, TunerSettings};
pub use controller::{Tuner, TunerState};
pub use datalog::{Datalog, DatalogError, TelemetrySink, TuningRecord};
pub use dimension::{CandidateOrigin, Dimension, Setting};
pub use error::{HardwareError, MeasurementError, TunerError};
pub use evaluator::{evaluate, Candidate, Evaluation};
pub use file_lock::FileLock;
pub use metrics::{average_cpu, measure, Sample};
pub use nic_config::NicConfig;
pub use platform::{Platform, SystemPlatform};
pub use rebalancer::{detect_skew, equalize_table, rebalance, CoreChange, ElasticityPolicy, Skew};
pub use selection::{decide, SelectionPolicy, StepOutcome};

use rxtune_config::Config;
use std::convert::Infallible;
use std::thread::JoinHandle;
use tracing::info;

/// Builds the tuner for the real machine from a loaded configuration and
/// starts it on its own thread. The thread only finishes on a fatal error.
pub fn start_tuner(
    config: Config,
    settings: TunerSettings,
) -> anyhow::Result<JoinHandle<Result<Infallible, TunerError>>> {
    let nic = NicConfig::from_config(&config);
    let platform = SystemPlatform::new(config.power_state.register)?;
    let sink = Datalog::from_path(config.log_file.as_deref())?;

    info!(
        "Tuning {} ({} / {}), {}s windows",
        nic.iface,
        nic.action_metric,
        nic.total_metric,
        settings.interval.as_secs()
    );
    Ok(spawn_tuner(Tuner::new(platform, sink, settings, nic))?)
}

/// Runs `tuner` on a thread named "Tuner".
pub fn spawn_tuner<P, S>(
    tuner: Tuner<P, S>,
) -> std::io::Result<JoinHandle<Result<Infallible, TunerError>>>
where
    P: Platform + Send + 'static,
    S: TelemetrySink + Send + 'static,
{
    std::thread::Builder::new()
        .name("Tuner".to_string())
        .spawn(move || tuner.run())
}
