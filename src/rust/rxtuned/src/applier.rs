//! Realises a [`NicConfig`] on the live interface.

use crate::dimension::Setting;
use crate::error::{nic_op, HardwareError};
use crate::nic_config::NicConfig;
use crate::platform::Platform;
use rxtune_sys::{fill_indirection, Nic, PowerRegister};
use tracing::debug;

/// Driver private flag controlling CQE compression.
pub const CQE_COMPRESS_FLAG: &str = "rx_cqe_compress";

/// Driver private flag controlling striding receive queues.
pub const RX_STRIDING_FLAG: &str = "rx_striding_rq";

/// Writes the offload flags, then the ring sizes. Resizing the rings
/// rebuilds the polling context, so the flags must already be in place.
/// Anything that already matches is left alone.
pub fn apply<N: Nic + ?Sized>(nic: &mut N, config: &NicConfig) -> Result<(), HardwareError> {
    let iface = config.iface.as_str();

    let current_flags = nic
        .private_flags(iface)
        .map_err(nic_op("read private flags"))?;
    let mut flags = current_flags.clone();
    flags.insert(CQE_COMPRESS_FLAG.to_string(), config.cqe_compress);
    flags.insert(RX_STRIDING_FLAG.to_string(), config.rx_striding);
    if flags != current_flags {
        debug!(
            "{iface}: {CQE_COMPRESS_FLAG}={} {RX_STRIDING_FLAG}={}",
            config.cqe_compress, config.rx_striding
        );
        nic.set_private_flags(iface, &flags)
            .map_err(nic_op("write private flags"))?;
    }

    let current_ring = nic.ring(iface).map_err(nic_op("read ring parameters"))?;
    let mut ring = current_ring;
    ring.rx_pending = config.rx_queue_depth;
    ring.tx_pending = config.tx_budget;
    if ring != current_ring {
        debug!(
            "{iface}: rx ring {} tx ring {}",
            ring.rx_pending, ring.tx_pending
        );
        nic.set_ring(iface, &ring)
            .map_err(nic_op("write ring parameters"))?;
    }
    Ok(())
}

/// Spreads the RSS table across the weighted cores, keeping the size the
/// device already uses.
pub fn apply_indirection<N: Nic + ?Sized>(
    nic: &mut N,
    config: &NicConfig,
) -> Result<(), HardwareError> {
    let iface = config.iface.as_str();
    let current = nic
        .indirection(iface)
        .map_err(nic_op("read RSS indirection table"))?;
    let table =
        fill_indirection(current.len(), &config.core_weights).ok_or(HardwareError::EmptyWeights)?;
    if table != current {
        debug!("{iface}: RSS over {} cores", config.weighted_cores());
        nic.set_indirection(iface, &table)
            .map_err(nic_op("write RSS indirection table"))?;
    }
    Ok(())
}

/// Writes `value` to the power-state register on every CPU.
pub fn apply_power_state<R: PowerRegister + ?Sized>(
    register: &mut R,
    value: u64,
) -> Result<(), HardwareError> {
    debug!("power state {value:#x}");
    register
        .write_all(value)
        .map_err(|source| HardwareError::PowerState { value, source })
}

/// Realises the one part of `config` that `setting` touches.
pub fn apply_setting<P: Platform + ?Sized>(
    platform: &mut P,
    config: &NicConfig,
    setting: Setting,
) -> Result<(), HardwareError> {
    match setting {
        Setting::PowerState(value) => apply_power_state(platform, value),
        _ => apply(platform, config),
    }
}

/// Realises every part of `config`.
pub fn apply_all<P: Platform + ?Sized>(
    platform: &mut P,
    config: &NicConfig,
) -> Result<(), HardwareError> {
    apply(platform, config)?;
    apply_indirection(platform, config)?;
    apply_power_state(platform, config.power_state)
}
