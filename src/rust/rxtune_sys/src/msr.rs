//! Model-specific register writes through the `msr` driver's
//! `/dev/cpu/<n>/msr` character devices.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error};

const CPU_DEVICE_DIR: &str = "/dev/cpu";

/// A register that can be written on every CPU at once.
pub trait PowerRegister {
    /// Writes `value` to the register on every online CPU.
    fn write_all(&mut self, value: u64) -> Result<(), MsrError>;
}

/// A single MSR, identified by its address.
pub struct Msr {
    register: u32,
}

impl Msr {
    /// Targets the register at `register` (e.g. `0xc8b`).
    pub fn new(register: u32) -> Self {
        Self { register }
    }

    fn device_paths() -> Result<Vec<PathBuf>, MsrError> {
        let entries = std::fs::read_dir(CPU_DEVICE_DIR).map_err(|e| {
            error!("Unable to list {CPU_DEVICE_DIR}. Is the msr module loaded?");
            MsrError::NoDevices(e)
        })?;
        let names = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok());
        let paths: Vec<PathBuf> = cpu_ids(names)
            .into_iter()
            .map(|cpu| Path::new(CPU_DEVICE_DIR).join(cpu.to_string()).join("msr"))
            .filter(|path| path.exists())
            .collect();
        if paths.is_empty() {
            return Err(MsrError::NoDevices(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no /dev/cpu/*/msr devices",
            )));
        }
        Ok(paths)
    }
}

impl PowerRegister for Msr {
    fn write_all(&mut self, value: u64) -> Result<(), MsrError> {
        let paths = Self::device_paths()?;
        for path in paths.iter() {
            let file = OpenOptions::new()
                .write(true)
                .open(path)
                .map_err(|e| MsrError::Write {
                    path: path.clone(),
                    source: e,
                })?;
            file.write_all_at(&value.to_le_bytes(), self.register as u64)
                .map_err(|e| MsrError::Write {
                    path: path.clone(),
                    source: e,
                })?;
        }
        debug!("MSR {:#x} = {:#x} on {} CPUs", self.register, value, paths.len());
        Ok(())
    }
}

/// Keeps the numeric CPU directories, sorted.
fn cpu_ids<I: Iterator<Item = String>>(names: I) -> Vec<u32> {
    let mut ids: Vec<u32> = names.filter_map(|name| name.parse().ok()).collect();
    ids.sort_unstable();
    ids
}

/// Errors from MSR access.
#[derive(Debug, Error)]
pub enum MsrError {
    /// `/dev/cpu/*/msr` is missing
    #[error("No MSR devices available: {0}")]
    NoDevices(#[source] std::io::Error),
    /// A per-CPU write failed
    #[error("Unable to write {path:?}: {source}")]
    Write {
        /// Device written
        path: PathBuf,
        /// OS error
        #[source]
        source: std::io::Error,
    },
}
