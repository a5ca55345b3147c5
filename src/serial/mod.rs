//! # Serial Communication Module
//!
//! Serial transport to the flight controller.
//!
//! This module handles:
//! - Opening the port (8N1, no flow control) from a list of candidate paths
//! - Non-blocking reads of whatever bytes have arrived
//! - Writing and flushing MSP requests

pub mod port_trait;

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt};
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::{FcLinkError, Result};
use port_trait::Transport;

/// Device paths tried after the configured one (in order of preference)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyACM0", // USB CDC (most flight controllers)
    "/dev/ttyUSB0", // USB-to-serial adapters
];

/// Flight controller serial port
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
    device_path: String,
    open: bool,
}

impl std::fmt::Debug for TokioSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioSerialPort")
            .field("device_path", &self.device_path)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl TokioSerialPort {
    /// Open the configured port, falling back to [`DEFAULT_DEVICE_PATHS`]
    ///
    /// # Errors
    ///
    /// Returns [`FcLinkError::SerialPortNotFound`] if no path could be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use fc_link::config::SerialConfig;
    /// use fc_link::serial::TokioSerialPort;
    ///
    /// let port = TokioSerialPort::open(&SerialConfig::default())?;
    /// println!("Connected to: {}", port.device_path());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let mut paths = vec![config.port.as_str()];
        paths.extend(DEFAULT_DEVICE_PATHS.iter().copied().filter(|p| *p != config.port));
        Self::open_with_paths(&paths, config.baud_rate)
    }

    /// Try each path in order and keep the first that opens
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try (e.g., &["/dev/ttyACM0"])
    /// * `baud_rate` - Line speed
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened flight controller at {} ({} baud)", path, baud_rate);
                    return Ok(Self {
                        port,
                        device_path: path.to_string(),
                        open: true,
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(FcLinkError::SerialPortNotFound(paths.join(", ")))
    }

    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| FcLinkError::Serial(format!("Failed to open {}: {}", path, e)))
    }

    /// Path of the opened device (e.g. "/dev/ttyACM0")
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    fn fail(&mut self, e: io::Error) -> io::Error {
        if !matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) {
            warn!("Serial link {} lost: {}", self.device_path, e);
            self.open = false;
        }
        e
    }
}

#[async_trait]
impl Transport for TokioSerialPort {
    async fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let available = match self.port.bytes_to_read() {
            Ok(n) => n as usize,
            Err(e) => return Err(self.fail(io::Error::from(e))),
        };
        if available == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; available];
        let read = match self.port.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => return Err(self.fail(e)),
        };
        buf.truncate(read);
        Ok(buf)
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if let Err(e) = self.port.write_all(data).await {
            return Err(self.fail(e));
        }
        if let Err(e) = self.port.flush().await {
            return Err(self.fail(e));
        }
        debug!("Wrote {} bytes to {}", data.len(), self.device_path);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
