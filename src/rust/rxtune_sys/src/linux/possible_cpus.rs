use std::ops::RangeInclusive;
use std::path::Path;

use thiserror::Error;
use tracing::error;

const POSSIBLE_CPUS_PATH: &str = "/sys/devices/system/cpu/possible";

/// Number of CPU ids the kernel may ever bring online, read from
/// `/sys/devices/system/cpu/possible`. This is the highest listed id plus
/// one, so `0-15` gives 16 and a sparse `0-3,8-11` gives 12. It bounds the
/// ring indices an RSS indirection table can name.
pub fn num_possible_cpus() -> Result<u32, PossibleCpuError> {
    let path = Path::new(POSSIBLE_CPUS_PATH);
    if !path.exists() {
        error!("{POSSIBLE_CPUS_PATH} does not exist");
        return Err(PossibleCpuError::FileNotFound);
    }
    let contents = std::fs::read_to_string(path).map_err(|e| {
        error!("Unable to read {POSSIBLE_CPUS_PATH}: {e:?}");
        PossibleCpuError::UnableToRead
    })?;
    let ranges = parse_cpu_list(&contents).inspect_err(|e| error!("{e}"))?;
    Ok(highest_cpu(&ranges) + 1)
}

/// Parses a kernel CPU list (`0`, `0-15`, `0-3,8-11`) into its ranges.
fn parse_cpu_list(list: &str) -> Result<Vec<RangeInclusive<u32>>, PossibleCpuError> {
    let bad = || PossibleCpuError::ParseError(list.trim().to_string());
    list.trim()
        .split(',')
        .map(|part| {
            let (first, last) = part.split_once('-').unwrap_or((part, part));
            let first: u32 = first.trim().parse().map_err(|_| bad())?;
            let last: u32 = last.trim().parse().map_err(|_| bad())?;
            if first > last {
                return Err(bad());
            }
            Ok(first..=last)
        })
        .collect()
}

fn highest_cpu(ranges: &[RangeInclusive<u32>]) -> u32 {
    ranges.iter().map(|r| *r.end()).max().unwrap_or(0)
}

/// Errors from reading the possible-CPU list.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PossibleCpuError {
    /// The sysfs file is missing
    #[error("Unable to access {POSSIBLE_CPUS_PATH}")]
    FileNotFound,
    /// The sysfs file could not be read
    #[error("Unable to read {POSSIBLE_CPUS_PATH}")]
    UnableToRead,
    /// The sysfs file held something other than a CPU list
    #[error("Unable to parse CPU list '{0}'")]
    ParseError(String),
}
