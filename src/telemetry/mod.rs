//! # Telemetry Module
//!
//! Records session events to JSONL files with rotation.
//!
//! Each line is one event:
//!
//! ```text
//! {"timestamp":"2024-05-01T12:00:00.123+00:00","type":"link_stats","uplink_rssi_1":40,...}
//! ```
//!
//! A new file is started after `max_records_per_file` records.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::crsf::protocol::{BatterySensor, CrsfFrame, GpsData, LinkStatistics, CRSF_NUM_CHANNELS};
use crate::error::Result;
use crate::session::Event;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RecordData<'a> {
    Channels { channels: &'a [u16; CRSF_NUM_CHANNELS] },
    LinkStats(&'a LinkStatistics),
    Battery(&'a BatterySensor),
    Gps(&'a GpsData),
    RawFrame(&'a CrsfFrame),
}

#[derive(Serialize)]
struct Record<'a> {
    timestamp: String,
    #[serde(flatten)]
    data: RecordData<'a>,
}

impl<'a> From<&'a Event> for RecordData<'a> {
    fn from(event: &'a Event) -> Self {
        match event {
            Event::ChannelUpdate(set) => Self::Channels { channels: &set.channels },
            Event::LinkStats(stats) => Self::LinkStats(stats),
            Event::Battery(battery) => Self::Battery(battery),
            Event::Gps(gps) => Self::Gps(gps),
            Event::RawFrame(frame) => Self::RawFrame(frame),
        }
    }
}

/// JSONL event recorder
#[derive(Debug)]
pub struct TelemetryLogger {
    log_dir: PathBuf,
    max_records_per_file: usize,
    writer: Option<BufWriter<File>>,
    current_path: Option<PathBuf>,
    records_in_file: usize,
    files_created: usize,
}

impl TelemetryLogger {
    /// Create a logger writing into `log_dir`, creating the directory if needed.
    ///
    /// No file is opened until the first record.
    pub fn new<P: AsRef<Path>>(log_dir: P, max_records_per_file: usize) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        fs::create_dir_all(&log_dir)?;

        Ok(Self {
            log_dir,
            max_records_per_file: max_records_per_file.max(1),
            writer: None,
            current_path: None,
            records_in_file: 0,
            files_created: 0,
        })
    }

    /// Append one event as a JSON line
    pub fn log_event(&mut self, event: &Event) -> Result<()> {
        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        let record = Record {
            timestamp: Utc::now().to_rfc3339(),
            data: RecordData::from(event),
        };
        let line = serde_json::to_string(&record)?;

        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{}", line)?;
            self.records_in_file += 1;
        }
        Ok(())
    }

    /// Flush buffered records to disk
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// File currently being written, if any
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    /// Number of files opened so far
    pub fn files_created(&self) -> usize {
        self.files_created
    }

    fn rotate(&mut self) -> Result<()> {
        self.flush()?;

        let name = format!(
            "telemetry_{}_{:04}.jsonl",
            Utc::now().format("%Y%m%d_%H%M%S"),
            self.files_created
        );
        let path = self.log_dir.join(name);
        let file = File::create(&path)?;

        if self.files_created == 0 {
            info!("Recording telemetry to {}", path.display());
        } else {
            debug!("Rotated telemetry log to {}", path.display());
        }

        self.writer = Some(BufWriter::new(file));
        self.current_path = Some(path);
        self.records_in_file = 0;
        self.files_created += 1;
        Ok(())
    }
}

impl Drop for TelemetryLogger {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crsf::protocol::ChannelSet;
    use tempfile::TempDir;
    use tokio::time::Instant;

    fn link_stats() -> Event {
        Event::LinkStats(LinkStatistics {
            uplink_rssi_1: 40,
            uplink_rssi_2: 42,
            uplink_lq: 100,
            uplink_snr: 9,
            active_antenna: 0,
            rf_mode: 4,
            uplink_tx_power: 2,
            downlink_rssi: 50,
            downlink_lq: 99,
            downlink_snr: -3,
        })
    }

    fn read_lines(dir: &Path) -> Vec<serde_json::Value> {
        let mut paths: Vec<_> = fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect();
        paths.sort();
        paths
            .iter()
            .flat_map(|p| {
                fs::read_to_string(p)
                    .unwrap()
                    .lines()
                    .map(|l| serde_json::from_str(l).unwrap())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn test_creates_log_dir() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("nested/logs");

        let logger = TelemetryLogger::new(&dir, 10).unwrap();
        assert!(dir.is_dir());
        assert!(logger.current_path().is_none());
    }

    #[test]
    fn test_record_format() {
        let temp = TempDir::new().unwrap();
        let mut logger = TelemetryLogger::new(temp.path(), 10).unwrap();

        logger.log_event(&link_stats()).unwrap();
        logger.flush().unwrap();

        let records = read_lines(temp.path());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["type"], "link_stats");
        assert_eq!(records[0]["uplink_lq"], 100);
        assert_eq!(records[0]["downlink_snr"], -3);

        let timestamp = records[0]["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_channel_and_raw_records() {
        let temp = TempDir::new().unwrap();
        let mut logger = TelemetryLogger::new(temp.path(), 10).unwrap();

        let set = ChannelSet::centered(Instant::now());
        logger.log_event(&Event::ChannelUpdate(set)).unwrap();
        let frame = CrsfFrame::new(0xC8, 0x29, vec![1, 2]).unwrap();
        logger.log_event(&Event::RawFrame(frame)).unwrap();
        logger.flush().unwrap();

        let records = read_lines(temp.path());
        assert_eq!(records[0]["type"], "channels");
        assert_eq!(records[0]["channels"].as_array().unwrap().len(), 16);
        assert_eq!(records[0]["channels"][0], 1500);
        assert_eq!(records[1]["type"], "raw_frame");
        assert_eq!(records[1]["frame_type"], 0x29);
    }

    #[test]
    fn test_rotation() {
        let temp = TempDir::new().unwrap();
        let mut logger = TelemetryLogger::new(temp.path(), 2).unwrap();

        for _ in 0..5 {
            logger.log_event(&link_stats()).unwrap();
        }
        logger.flush().unwrap();

        assert_eq!(logger.files_created(), 3);
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 3);
        assert_eq!(read_lines(temp.path()).len(), 5);
    }

    #[test]
    fn test_drop_flushes() {
        let temp = TempDir::new().unwrap();
        {
            let mut logger = TelemetryLogger::new(temp.path(), 10).unwrap();
            logger.log_event(&link_stats()).unwrap();
        }
        assert_eq!(read_lines(temp.path()).len(), 1);
    }
}
