//! One CSV row per tuning step, so a run can be graphed afterwards.

use crate::nic_config::NicConfig;
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

const HEADER: [&str; 9] = [
    "budget",
    "rxqueue",
    "rx_cqe_compress",
    "rx_striding_rq",
    "throughput",
    "msr",
    "cpu",
    "core_count",
    "time",
];

/// A row of the results file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningRecord {
    pub budget: u32,
    pub rxqueue: u32,
    pub rx_cqe_compress: bool,
    pub rx_striding_rq: bool,
    pub throughput: u64,
    pub msr: String,
    pub cpu: String,
    pub core_count: u32,
    pub time: String,
}

impl TuningRecord {
    pub fn new(config: &NicConfig, throughput: u64, cpu: f64) -> Self {
        Self {
            budget: config.tx_budget,
            rxqueue: config.rx_queue_depth,
            rx_cqe_compress: config.cqe_compress,
            rx_striding_rq: config.rx_striding,
            throughput,
            msr: format!("{:x}", config.power_state),
            cpu: format!("{cpu:.6}"),
            core_count: config.core_count,
            time: chrono::Local::now().format("%H:%M:%S").to_string(),
        }
    }
}

/// Receives the configuration reached after each step.
pub trait TelemetrySink {
    fn record(&mut self, record: &TuningRecord) -> Result<(), DatalogError>;
}

/// Writes records to a CSV file, flushing after every row. With no path
/// configured, records are only logged.
pub struct Datalog {
    writer: Option<csv::Writer<File>>,
}

impl Datalog {
    /// Creates (or truncates) `path` and writes the header.
    pub fn create(path: &Path) -> Result<Self, DatalogError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        writer.write_record(HEADER)?;
        writer.flush()?;
        info!("Logging tuning results to {}", path.display());
        Ok(Self {
            writer: Some(writer),
        })
    }

    pub fn disabled() -> Self {
        debug!("No results file configured");
        Self { writer: None }
    }

    pub fn from_path(path: Option<&str>) -> Result<Self, DatalogError> {
        match path {
            Some(path) => Self::create(Path::new(path)),
            None => Ok(Self::disabled()),
        }
    }
}

impl TelemetrySink for Datalog {
    fn record(&mut self, record: &TuningRecord) -> Result<(), DatalogError> {
        info!(
            "budget={} rxqueue={} rx_cqe_compress={} rx_striding_rq={} throughput={} msr={} cpu={} core_count={}",
            record.budget,
            record.rxqueue,
            record.rx_cqe_compress,
            record.rx_striding_rq,
            record.throughput,
            record.msr,
            record.cpu,
            record.core_count
        );
        if let Some(writer) = self.writer.as_mut() {
            writer.serialize(record)?;
            writer.flush()?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DatalogError {
    #[error("Unable to write results file: {0}")]
    Csv(#[from] csv::Error),
    #[error("Unable to flush results file: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod test {
    use super::*;
    use rxtune_config::Config;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("rxtune-{}-{name}", std::process::id()))
    }

    #[test]
    fn record_carries_config_and_measurements() {
        let config = NicConfig::from_config(&Config::default());
        let record = TuningRecord::new(&config, 1_234_567, 42.5);
        assert_eq!(record.budget, 64);
        assert_eq!(record.rxqueue, 1024);
        assert_eq!(record.msr, "6000");
        assert_eq!(record.cpu, "42.500000");
        assert_eq!(record.core_count, 10);
        assert_eq!(record.time.len(), 8);
    }

    #[test]
    fn rows_are_on_disk_after_each_record() {
        let path = temp_path("rows.csv");
        let config = NicConfig::from_config(&Config::default());
        let mut log = Datalog::create(&path).unwrap();
        log.record(&TuningRecord::new(&config, 1000, 12.0)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines[0],
            "budget,rxqueue,rx_cqe_compress,rx_striding_rq,throughput,msr,cpu,core_count,time"
        );
        assert!(lines[1].starts_with("64,1024,true,true,1000,6000,12.000000,10,"));
        assert_eq!(lines.len(), 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn disabled_log_accepts_records() {
        let config = NicConfig::from_config(&Config::default());
        let mut log = Datalog::from_path(None).unwrap();
        assert!(log.record(&TuningRecord::new(&config, 1, 1.0)).is_ok());
    }
}
