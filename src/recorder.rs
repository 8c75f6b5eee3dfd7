use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::drivers::AcquisitionError;
use crate::types::Sample;

pub const RUN_LOG_HEADER: [&str; 3] = ["timestamp_iso", "raw", "voltage"];

/// Durable per-run log: one CSV row per accepted sample.
pub struct RunLog {
    writer: csv::Writer<File>,
    path: PathBuf,
    rows: u64,
}

impl RunLog {
    /// `<data_dir>/eeg_<YYYYmmdd_HHMMSS>.csv`, with a numeric suffix if that name is taken.
    pub fn path_for(data_dir: &Path, started_at: DateTime<Local>) -> PathBuf {
        let stem = format!("eeg_{}", started_at.format("%Y%m%d_%H%M%S"));
        let mut candidate = data_dir.join(format!("{stem}.csv"));
        let mut n = 1;
        while candidate.exists() {
            candidate = data_dir.join(format!("{stem}_{n}.csv"));
            n += 1;
        }
        candidate
    }

    pub fn create(path: &Path) -> Result<Self, AcquisitionError> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| AcquisitionError::DataDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let mut writer = csv::Writer::from_path(path).map_err(|source| AcquisitionError::RunLog {
            path: path.to_path_buf(),
            source,
        })?;
        writer
            .write_record(RUN_LOG_HEADER)
            .map_err(|source| AcquisitionError::RunLog {
                path: path.to_path_buf(),
                source,
            })?;
        let mut log = Self {
            writer,
            path: path.to_path_buf(),
            rows: 0,
        };
        log.flush()?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn append(&mut self, sample: &Sample) -> Result<(), AcquisitionError> {
        let timestamp = sample
            .captured_at
            .naive_utc()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string();
        let raw = sample.raw.map(|r| r.to_string()).unwrap_or_default();
        self.writer
            .write_record([timestamp, raw, sample.voltage.to_string()])
            .map_err(|source| AcquisitionError::RunLog {
                path: self.path.clone(),
                source,
            })?;
        // 每行立即落盘，崩溃时最多丢失正在读取的那一行
        self.flush()?;
        self.rows += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), AcquisitionError> {
        self.writer.flush().map_err(|source| AcquisitionError::RunLog {
            path: self.path.clone(),
            source: source.into(),
        })
    }

    /// Flushes and returns how many rows were written.
    pub fn close(mut self) -> Result<u64, AcquisitionError> {
        self.flush()?;
        Ok(self.rows)
    }
}

/// Reads the `voltage` column of a run log in file order.
///
/// Rows whose voltage is empty or not a number are skipped.
pub fn read_history(path: &Path) -> Result<Vec<f64>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let Some(column) = reader
        .headers()?
        .iter()
        .position(|h| h.trim() == "voltage")
    else {
        log::warn!("{} has no 'voltage' column", path.display());
        return Ok(Vec::new());
    };
    let mut voltages = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(v) = record
            .get(column)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<f64>().ok())
        {
            voltages.push(v);
        }
    }
    Ok(voltages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample(raw: Option<u32>, voltage: f64) -> Sample {
        Sample {
            captured_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            raw,
            voltage,
        }
    }

    #[test]
    fn writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("eeg_test.csv");
        let mut log = RunLog::create(&path).unwrap();
        log.append(&sample(Some(1425), 1.87)).unwrap();
        log.append(&sample(None, 0.42)).unwrap();
        assert_eq!(log.close().unwrap(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp_iso,raw,voltage");
        assert_eq!(lines[1], "2024-05-01T12:00:00.000000,1425,1.87");
        assert_eq!(lines[2], "2024-05-01T12:00:00.000000,,0.42");
    }

    #[test]
    fn rows_reach_disk_before_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eeg_crash.csv");
        let mut log = RunLog::create(&path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "timestamp_iso,raw,voltage\n"
        );
        for v in [0.1, 0.2, 0.3, 0.4, 0.5] {
            log.append(&sample(None, v)).unwrap();
        }
        // simulated crash: the writer is never closed or dropped
        std::mem::forget(log);
        assert_eq!(read_history(&path).unwrap(), vec![0.1, 0.2, 0.3, 0.4, 0.5]);
    }

    #[test]
    fn history_skips_rows_without_voltage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hist.csv");
        std::fs::write(
            &path,
            "timestamp_iso,raw,voltage\n\
             t0,1,0.1\n\
             t1,2,\n\
             t2,3,0.2\n\
             t3,4,0.3\n\
             t4,5,\n\
             t5,6,0.4\n\
             t6,7,0.5\n",
        )
        .unwrap();
        assert_eq!(read_history(&path).unwrap(), vec![0.1, 0.2, 0.3, 0.4, 0.5]);
    }

    #[test]
    fn history_reads_what_the_run_log_wrote() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("round.csv");
        let mut log = RunLog::create(&path).unwrap();
        for v in [1.5, -0.25, 2.0] {
            log.append(&sample(None, v)).unwrap();
        }
        log.close().unwrap();
        assert_eq!(read_history(&path).unwrap(), vec![1.5, -0.25, 2.0]);
    }

    #[test]
    fn path_for_never_reuses_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let at = Local.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let first = RunLog::path_for(dir.path(), at);
        assert!(first.ends_with("eeg_20240501_093000.csv"));
        std::fs::write(&first, "").unwrap();
        let second = RunLog::path_for(dir.path(), at);
        assert!(second.ends_with("eeg_20240501_093000_1.csv"));
    }
}
