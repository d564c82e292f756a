//! Bundles the hardware the tuner drives behind one generic parameter.

use crate::error::HardwareError;
use rxtune_sys::{
    CpuSampleError, CpuSampler, Ethtool, EthtoolError, Msr, MsrError, Nic, Pacer, PowerRegister,
    RingParams, SleepPacer, SysinfoSampler, XdpProgram,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Everything the control loop touches: the interface, the power-state
/// register, CPU sampling, the settle clock and the counting program.
pub trait Platform: Nic + PowerRegister + CpuSampler + Pacer {
    /// Attaches the packet-counting program to `interface`.
    fn attach_counter(&mut self, interface: &str) -> Result<(), HardwareError>;
}

/// The real machine.
pub struct SystemPlatform {
    ethtool: Ethtool,
    msr: Msr,
    cpus: SysinfoSampler,
    pacer: SleepPacer,
    xdp: Option<XdpProgram>,
}

impl SystemPlatform {
    pub fn new(register: u32) -> Result<Self, HardwareError> {
        let ethtool = Ethtool::new().map_err(crate::error::nic_op("open ethtool socket"))?;
        Ok(Self {
            ethtool,
            msr: Msr::new(register),
            cpus: SysinfoSampler::new(),
            pacer: SleepPacer,
            xdp: None,
        })
    }
}

impl Platform for SystemPlatform {
    fn attach_counter(&mut self, interface: &str) -> Result<(), HardwareError> {
        // Replacing an existing attachment detaches the old one first.
        self.xdp = None;
        let program = XdpProgram::attach(interface)?;
        self.xdp = Some(program);
        Ok(())
    }
}

impl Nic for SystemPlatform {
    fn statistics(&mut self, interface: &str) -> Result<HashMap<String, u64>, EthtoolError> {
        self.ethtool.statistics(interface)
    }

    fn private_flags(&mut self, interface: &str) -> Result<BTreeMap<String, bool>, EthtoolError> {
        self.ethtool.private_flags(interface)
    }

    fn set_private_flags(
        &mut self,
        interface: &str,
        flags: &BTreeMap<String, bool>,
    ) -> Result<(), EthtoolError> {
        self.ethtool.set_private_flags(interface, flags)
    }

    fn ring(&mut self, interface: &str) -> Result<RingParams, EthtoolError> {
        self.ethtool.ring(interface)
    }

    fn set_ring(&mut self, interface: &str, ring: &RingParams) -> Result<(), EthtoolError> {
        self.ethtool.set_ring(interface, ring)
    }

    fn indirection(&mut self, interface: &str) -> Result<Vec<u32>, EthtoolError> {
        self.ethtool.indirection(interface)
    }

    fn set_indirection(&mut self, interface: &str, table: &[u32]) -> Result<(), EthtoolError> {
        self.ethtool.set_indirection(interface, table)
    }
}

impl PowerRegister for SystemPlatform {
    fn write_all(&mut self, value: u64) -> Result<(), MsrError> {
        self.msr.write_all(value)
    }
}

impl CpuSampler for SystemPlatform {
    fn sample(&mut self, window: Duration) -> Result<Vec<f64>, CpuSampleError> {
        self.cpus.sample(window)
    }
}

impl Pacer for SystemPlatform {
    fn settle(&mut self, interval: Duration) -> Duration {
        self.pacer.settle(interval)
    }
}
