#![warn(missing_docs)]

//! `rxtune_sys` is the system layer of the receive-path tuner. It wraps
//! the handful of Linux facilities the tuner drives: the ethtool
//! interface (ring parameters, RSS indirection, private flags and
//! statistics), the per-CPU model-specific registers, CPU utilisation
//! sampling and the XDP drop program.
//!
//! Each facility is exposed through a small trait (`Nic`,
//! `PowerRegister`, `CpuSampler`, `Pacer`) so that the control loop can
//! be driven against real hardware or a recording double.

mod cpu_usage;
mod ethtool;
mod linux;
mod msr;
mod xdp;

pub use cpu_usage::{CpuSampleError, CpuSampler, Pacer, SleepPacer, SysinfoSampler};
pub use ethtool::{fill_indirection, Ethtool, EthtoolError, Nic, RingParams};
pub use linux::{num_possible_cpus, PossibleCpuError};
pub use msr::{Msr, MsrError, PowerRegister};
pub use xdp::{XdpError, XdpProgram};
