//! A scripted machine for exercising the control loop without hardware.
//! Counters advance according to a load model that can look at whatever
//! is currently configured, so a probe changes what the next window sees.

use crate::error::HardwareError;
use crate::platform::Platform;
use rxtune_sys::{
    CpuSampleError, CpuSampler, EthtoolError, MsrError, Nic, Pacer, PowerRegister, RingParams,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

pub(crate) struct Load {
    pub action_pps: u64,
    pub total_pps: u64,
    pub per_core_cpu: Vec<f64>,
}

type Model = Box<dyn Fn(&MockPlatform) -> Load + Send>;

pub(crate) struct MockPlatform {
    pub flags: BTreeMap<String, bool>,
    pub ring: RingParams,
    pub table: Vec<u32>,
    pub power_state: u64,
    /// Every hardware write, in order: "flags", "ring", "indirection", "msr".
    pub writes: Vec<&'static str>,
    pub attached: Option<String>,
    /// Fail the statistics read after this many more succeed.
    pub fail_read: Option<usize>,
    /// Fail the next CPU sample.
    pub fail_cpu: bool,
    action_count: u64,
    total_count: u64,
    model: Model,
}

impl MockPlatform {
    pub fn new(model: impl Fn(&MockPlatform) -> Load + Send + 'static) -> Self {
        let flags = [
            ("rx_cqe_moder", true),
            ("rx_cqe_compress", false),
            ("rx_striding_rq", false),
        ]
        .into_iter()
        .map(|(name, on)| (name.to_string(), on))
        .collect();
        Self {
            flags,
            ring: RingParams {
                rx_max_pending: 8192,
                tx_max_pending: 8192,
                rx_pending: 1024,
                tx_pending: 1024,
                ..Default::default()
            },
            table: vec![0; 128],
            power_state: 0,
            writes: Vec::new(),
            attached: None,
            fail_read: None,
            fail_cpu: false,
            action_count: 0,
            total_count: 0,
            model: Box::new(model),
        }
    }

    /// A machine whose load never changes.
    pub fn steady(action_pps: u64, total_pps: u64, cpu: f64) -> Self {
        Self::new(move |_| Load {
            action_pps,
            total_pps,
            per_core_cpu: vec![cpu; 32],
        })
    }

    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    /// Cores the indirection table currently points at.
    pub fn table_cores(&self) -> usize {
        let mut cores: Vec<u32> = self.table.clone();
        cores.sort_unstable();
        cores.dedup();
        cores.len()
    }
}

impl Platform for MockPlatform {
    fn attach_counter(&mut self, interface: &str) -> Result<(), HardwareError> {
        self.attached = Some(interface.to_string());
        Ok(())
    }
}

impl Nic for MockPlatform {
    fn statistics(&mut self, _interface: &str) -> Result<HashMap<String, u64>, EthtoolError> {
        match self.fail_read {
            Some(0) => {
                self.fail_read = None;
                return Err(EthtoolError::Parse("scripted failure".to_string()));
            }
            Some(n) => self.fail_read = Some(n - 1),
            None => {}
        }
        Ok(HashMap::from([
            ("rx_xdp_drop".to_string(), self.action_count),
            ("rx_packets_phy".to_string(), self.total_count),
            ("rx_packets".to_string(), self.action_count),
        ]))
    }

    fn private_flags(&mut self, _interface: &str) -> Result<BTreeMap<String, bool>, EthtoolError> {
        Ok(self.flags.clone())
    }

    fn set_private_flags(
        &mut self,
        _interface: &str,
        flags: &BTreeMap<String, bool>,
    ) -> Result<(), EthtoolError> {
        self.writes.push("flags");
        self.flags = flags.clone();
        Ok(())
    }

    fn ring(&mut self, _interface: &str) -> Result<RingParams, EthtoolError> {
        Ok(self.ring)
    }

    fn set_ring(&mut self, _interface: &str, ring: &RingParams) -> Result<(), EthtoolError> {
        self.writes.push("ring");
        self.ring = *ring;
        Ok(())
    }

    fn indirection(&mut self, _interface: &str) -> Result<Vec<u32>, EthtoolError> {
        Ok(self.table.clone())
    }

    fn set_indirection(&mut self, _interface: &str, table: &[u32]) -> Result<(), EthtoolError> {
        self.writes.push("indirection");
        self.table = table.to_vec();
        Ok(())
    }
}

impl PowerRegister for MockPlatform {
    fn write_all(&mut self, value: u64) -> Result<(), MsrError> {
        self.writes.push("msr");
        self.power_state = value;
        Ok(())
    }
}

impl CpuSampler for MockPlatform {
    fn sample(&mut self, _window: Duration) -> Result<Vec<f64>, CpuSampleError> {
        if std::mem::take(&mut self.fail_cpu) {
            return Err(CpuSampleError::InvalidReading);
        }
        Ok((self.model)(self).per_core_cpu)
    }
}

impl Pacer for MockPlatform {
    fn settle(&mut self, interval: Duration) -> Duration {
        let load = (self.model)(self);
        let secs = interval.as_secs();
        self.action_count += load.action_pps * secs;
        self.total_count += load.total_pps * secs;
        interval
    }
}
