//! Access to a NIC's driver settings.
//!
//! Ring parameters and the RSS indirection table are fixed-layout
//! structures, so they go straight through the `SIOCETHTOOL` ioctl.
//! Statistics and private flags are keyed by driver-defined strings,
//! which the `ethtool` binary already resolves for us, so those shell out.

use nix::libc;
use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, error};

#[allow(non_upper_case_globals, non_camel_case_types, non_snake_case, dead_code)]
mod bindings {
    include!(concat!(env!("OUT_DIR"), "/bindings.rs"));
}
use bindings::{
    ethtool_ringparam, ethtool_rxfh_indir, ifreq, ETHTOOL_GRINGPARAM, ETHTOOL_GRXFHINDIR,
    ETHTOOL_SRINGPARAM, ETHTOOL_SRXFHINDIR, IFNAMSIZ, SIOCETHTOOL,
};

const ETHTOOL_PATH: &str = "/sbin/ethtool";

// u32 words taken by `cmd` and `size` ahead of `ring_index`.
const RXFH_HEADER_WORDS: usize = mem::size_of::<ethtool_rxfh_indir>() / mem::size_of::<u32>();

/// Operations the tuner needs from a network interface driver.
pub trait Nic {
    /// Reads every driver statistic (`ethtool -S`).
    fn statistics(&mut self, interface: &str) -> Result<HashMap<String, u64>, EthtoolError>;

    /// Reads the driver's private flags.
    fn private_flags(&mut self, interface: &str) -> Result<BTreeMap<String, bool>, EthtoolError>;

    /// Writes the driver's private flags.
    fn set_private_flags(
        &mut self,
        interface: &str,
        flags: &BTreeMap<String, bool>,
    ) -> Result<(), EthtoolError>;

    /// Reads the current ring parameters.
    fn ring(&mut self, interface: &str) -> Result<RingParams, EthtoolError>;

    /// Writes new ring parameters.
    fn set_ring(&mut self, interface: &str, ring: &RingParams) -> Result<(), EthtoolError>;

    /// Reads the RSS indirection table: one ring index per hash bucket.
    fn indirection(&mut self, interface: &str) -> Result<Vec<u32>, EthtoolError>;

    /// Replaces the RSS indirection table.
    fn set_indirection(&mut self, interface: &str, table: &[u32]) -> Result<(), EthtoolError>;
}

/// Ring sizes, as reported by `ETHTOOL_GRINGPARAM`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RingParams {
    /// Maximum RX ring size supported by the device
    pub rx_max_pending: u32,
    /// Maximum RX mini ring size
    pub rx_mini_max_pending: u32,
    /// Maximum RX jumbo ring size
    pub rx_jumbo_max_pending: u32,
    /// Maximum TX ring size
    pub tx_max_pending: u32,
    /// Current RX ring size
    pub rx_pending: u32,
    /// Current RX mini ring size
    pub rx_mini_pending: u32,
    /// Current RX jumbo ring size
    pub rx_jumbo_pending: u32,
    /// Current TX ring size
    pub tx_pending: u32,
}

fn ring_request(cmd: u32, ring: &RingParams) -> ethtool_ringparam {
    ethtool_ringparam {
        cmd,
        rx_max_pending: ring.rx_max_pending,
        rx_mini_max_pending: ring.rx_mini_max_pending,
        rx_jumbo_max_pending: ring.rx_jumbo_max_pending,
        tx_max_pending: ring.tx_max_pending,
        rx_pending: ring.rx_pending,
        rx_mini_pending: ring.rx_mini_pending,
        rx_jumbo_pending: ring.rx_jumbo_pending,
        tx_pending: ring.tx_pending,
    }
}

impl From<&ethtool_ringparam> for RingParams {
    fn from(param: &ethtool_ringparam) -> Self {
        Self {
            rx_max_pending: param.rx_max_pending,
            rx_mini_max_pending: param.rx_mini_max_pending,
            rx_jumbo_max_pending: param.rx_jumbo_max_pending,
            tx_max_pending: param.tx_max_pending,
            rx_pending: param.rx_pending,
            rx_mini_pending: param.rx_mini_pending,
            rx_jumbo_pending: param.rx_jumbo_pending,
            tx_pending: param.tx_pending,
        }
    }
}

/// Builds the `ifreq` that carries an ethtool command for `interface`.
fn interface_request(interface: &str, data: *mut libc::c_void) -> Result<ifreq, EthtoolError> {
    let bytes = interface.as_bytes();
    if bytes.is_empty() || bytes.len() >= IFNAMSIZ as usize || bytes.contains(&0) {
        return Err(EthtoolError::InterfaceName(interface.to_string()));
    }
    let mut request: ifreq = unsafe { mem::zeroed() };
    // SAFETY: both union members are plain data; the name was length-checked
    // above so the trailing NUL survives.
    unsafe {
        for (dst, src) in request.ifr_ifrn.ifrn_name.iter_mut().zip(bytes) {
            *dst = *src as libc::c_char;
        }
        request.ifr_ifru.ifru_data = data as _;
    }
    Ok(request)
}

/// Handle to the ethtool interface. Holds the datagram socket used as
/// the ioctl target for the lifetime of the tuner.
pub struct Ethtool {
    socket: OwnedFd,
}

impl Ethtool {
    /// Opens the control socket.
    pub fn new() -> Result<Self, EthtoolError> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
        if fd < 0 {
            let err = std::io::Error::last_os_error();
            error!("Unable to open ethtool control socket: {err}");
            return Err(EthtoolError::Socket(err));
        }
        let socket = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { socket })
    }

    fn ioctl(
        &self,
        interface: &str,
        command: u32,
        data: *mut libc::c_void,
    ) -> Result<(), EthtoolError> {
        let mut request = interface_request(interface, data)?;
        let result = unsafe {
            libc::ioctl(
                self.socket.as_raw_fd(),
                SIOCETHTOOL as _,
                &mut request as *mut ifreq,
            )
        };
        if result < 0 {
            return Err(EthtoolError::Ioctl {
                interface: interface.to_string(),
                command,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn run(args: &[&str]) -> Result<String, EthtoolError> {
        debug!("{ETHTOOL_PATH} {}", args.join(" "));
        let output = Command::new(ETHTOOL_PATH)
            .args(args)
            .output()
            .map_err(EthtoolError::Spawn)?;
        if !output.status.success() {
            return Err(EthtoolError::CommandFailed {
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Nic for Ethtool {
    fn statistics(&mut self, interface: &str) -> Result<HashMap<String, u64>, EthtoolError> {
        let raw = Self::run(&["-S", interface])?;
        Ok(parse_statistics(&raw))
    }

    fn private_flags(&mut self, interface: &str) -> Result<BTreeMap<String, bool>, EthtoolError> {
        let raw = Self::run(&["--show-priv-flags", interface])?;
        parse_private_flags(&raw)
    }

    fn set_private_flags(
        &mut self,
        interface: &str,
        flags: &BTreeMap<String, bool>,
    ) -> Result<(), EthtoolError> {
        let mut args = vec!["--set-priv-flags", interface];
        for (name, enabled) in flags {
            args.push(name.as_str());
            args.push(if *enabled { "on" } else { "off" });
        }
        Self::run(&args).map(|_| ())
    }

    fn ring(&mut self, interface: &str) -> Result<RingParams, EthtoolError> {
        let mut param = ring_request(ETHTOOL_GRINGPARAM, &RingParams::default());
        self.ioctl(
            interface,
            ETHTOOL_GRINGPARAM,
            &mut param as *mut ethtool_ringparam as *mut libc::c_void,
        )?;
        Ok(RingParams::from(&param))
    }

    fn set_ring(&mut self, interface: &str, ring: &RingParams) -> Result<(), EthtoolError> {
        let mut param = ring_request(ETHTOOL_SRINGPARAM, ring);
        self.ioctl(
            interface,
            ETHTOOL_SRINGPARAM,
            &mut param as *mut ethtool_ringparam as *mut libc::c_void,
        )
    }

    fn indirection(&mut self, interface: &str) -> Result<Vec<u32>, EthtoolError> {
        // First call with size 0 asks the driver how big the table is.
        let mut header: ethtool_rxfh_indir = unsafe { mem::zeroed() };
        header.cmd = ETHTOOL_GRXFHINDIR;
        self.ioctl(
            interface,
            ETHTOOL_GRXFHINDIR,
            &mut header as *mut ethtool_rxfh_indir as *mut libc::c_void,
        )?;
        let size = header.size as usize;
        if size == 0 {
            return Err(EthtoolError::NoIndirectionTable(interface.to_string()));
        }

        let mut buffer = rxfh_buffer(ETHTOOL_GRXFHINDIR, &vec![0; size]);
        self.ioctl(
            interface,
            ETHTOOL_GRXFHINDIR,
            buffer.as_mut_ptr() as *mut libc::c_void,
        )?;
        Ok(buffer.split_off(RXFH_HEADER_WORDS))
    }

    fn set_indirection(&mut self, interface: &str, table: &[u32]) -> Result<(), EthtoolError> {
        if table.is_empty() {
            return Err(EthtoolError::NoIndirectionTable(interface.to_string()));
        }
        let mut buffer = rxfh_buffer(ETHTOOL_SRXFHINDIR, table);
        self.ioctl(
            interface,
            ETHTOOL_SRXFHINDIR,
            buffer.as_mut_ptr() as *mut libc::c_void,
        )
    }
}

/// Lays out an `ethtool_rxfh_indir` followed by its `ring_index` entries
/// in one u32 buffer, which keeps the flexible array member aligned.
fn rxfh_buffer(cmd: u32, table: &[u32]) -> Vec<u32> {
    let mut buffer = vec![0u32; RXFH_HEADER_WORDS];
    buffer[0] = cmd;
    buffer[1] = table.len() as u32;
    buffer.extend_from_slice(table);
    buffer
}

/// Builds an indirection table of `size` entries that spreads hash buckets
/// across rings in proportion to `weights`, the same way `ethtool -X weight`
/// does. Returns `None` if every weight is zero.
pub fn fill_indirection(size: usize, weights: &[u32]) -> Option<Vec<u32>> {
    let sum: u64 = weights.iter().map(|w| *w as u64).sum();
    if sum == 0 {
        return None;
    }
    let size_u64 = size as u64;
    let mut table = Vec::with_capacity(size);
    let mut partial: u64 = 0;
    let mut ring: usize = 0;
    for i in 0..size_u64 {
        while i >= size_u64 * partial / sum {
            partial += weights[ring] as u64;
            ring += 1;
        }
        table.push((ring - 1) as u32);
    }
    Some(table)
}

fn parse_statistics(raw: &str) -> HashMap<String, u64> {
    raw.lines()
        .filter_map(|line| line.trim().split_once(':'))
        .filter_map(|(key, value)| {
            value
                .trim()
                .parse::<u64>()
                .ok()
                .map(|v| (key.trim().to_string(), v))
        })
        .collect()
}

fn parse_private_flags(raw: &str) -> Result<BTreeMap<String, bool>, EthtoolError> {
    let mut flags = BTreeMap::new();
    // Line one is the "Private flags for <iface>:" banner.
    for line in raw.lines().skip(1) {
        let Some((name, state)) = line.split_once(':') else {
            continue;
        };
        let enabled = match state.trim() {
            "on" => true,
            "off" => false,
            other => return Err(EthtoolError::Parse(format!("flag {} is '{other}'", name.trim()))),
        };
        flags.insert(name.trim().to_string(), enabled);
    }
    Ok(flags)
}

/// Errors from the ethtool layer.
#[derive(Debug, Error)]
pub enum EthtoolError {
    /// The control socket could not be opened
    #[error("Unable to open control socket: {0}")]
    Socket(#[source] std::io::Error),
    /// Interface names must fit in IFNAMSIZ
    #[error("Invalid interface name: {0}")]
    InterfaceName(String),
    /// An ethtool ioctl was rejected by the driver
    #[error("ethtool command {command:#x} failed on {interface}: {source}")]
    Ioctl {
        /// Interface the request targeted
        interface: String,
        /// ETHTOOL_* command number
        command: u32,
        /// OS error
        #[source]
        source: std::io::Error,
    },
    /// The device exposes no RSS indirection table
    #[error("{0} has no RSS indirection table")]
    NoIndirectionTable(String),
    /// The ethtool binary could not be started
    #[error("Unable to run ethtool: {0}")]
    Spawn(#[source] std::io::Error),
    /// The ethtool binary returned a failure status
    #[error("ethtool {args} failed: {stderr}")]
    CommandFailed {
        /// Arguments passed to ethtool
        args: String,
        /// Captured stderr
        stderr: String,
    },
    /// Unexpected ethtool output
    #[error("Unable to parse ethtool output: {0}")]
    Parse(String),
}
