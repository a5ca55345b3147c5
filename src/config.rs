//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and key is optional; missing values take the defaults below.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyACM0"
//! baud_rate = 115200
//! command_timeout_ms = 1000
//! poll_interval_ms = 2
//!
//! [crsf]
//! device_address = 0xC8
//! max_frame_size = 64
//!
//! [filter]
//! median_window = 3
//!
//! [telemetry]
//! enabled = false
//! log_dir = "./logs"
//! max_records_per_file = 10000
//! ```

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{FcLinkError, Result};
use crate::session::SessionConfig;

/// Baud rates accepted for the flight controller link
pub const SUPPORTED_BAUD_RATES: &[u32] = &[57600, 115200, 230400, 400000, 420000, 921600];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub crsf: CrsfConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Deadline for one MSP round trip
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Delay between empty reads
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// CRSF stream configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CrsfConfig {
    #[serde(default = "default_device_address")]
    pub device_address: u8,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

/// Channel smoothing configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FilterConfig {
    #[serde(default = "default_median_window")]
    pub median_window: usize,
}

/// Telemetry recording configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_command_timeout_ms() -> u64 { 1000 }
fn default_poll_interval_ms() -> u64 { 2 }

fn default_device_address() -> u8 { 0xC8 }
fn default_max_frame_size() -> usize { 64 }

fn default_median_window() -> usize { 3 }

fn default_telemetry_enabled() -> bool { false }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            command_timeout_ms: default_command_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for CrsfConfig {
    fn default() -> Self {
        Self {
            device_address: default_device_address(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            median_window: default_median_window(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
        }
    }
}

fn invalid(msg: impl std::fmt::Display) -> FcLinkError {
    FcLinkError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use fc_link::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 57600, 115200, 230400, 400000, 420000, 921600",
            ));
        }

        if self.serial.command_timeout_ms == 0 || self.serial.command_timeout_ms > 10000 {
            return Err(invalid("command_timeout_ms must be between 1 and 10000"));
        }

        if self.serial.poll_interval_ms == 0 || self.serial.poll_interval_ms > 1000 {
            return Err(invalid("poll_interval_ms must be between 1 and 1000"));
        }

        if self.crsf.max_frame_size < 6 || self.crsf.max_frame_size > 64 {
            return Err(invalid("max_frame_size must be between 6 and 64"));
        }

        if self.filter.median_window == 0 || self.filter.median_window > 15 {
            return Err(invalid("median_window must be between 1 and 15"));
        }

        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        Ok(())
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            device_address: config.crsf.device_address,
            max_frame_size: config.crsf.max_frame_size,
            median_window: config.filter.median_window,
            poll_interval: Duration::from_millis(config.serial.poll_interval_ms),
            command_timeout: Duration::from_millis(config.serial.command_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invalid(config: Config, needle: &str) {
        match config.validate() {
            Err(FcLinkError::Config(e)) => {
                assert!(e.to_string().contains(needle), "unexpected message: {}", e)
            }
            other => panic!("Expected Config error mentioning {}, got: {:?}", needle, other),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_serial_port(), "/dev/ttyACM0");
        assert_eq!(default_baud_rate(), 115200);
        assert_eq!(default_command_timeout_ms(), 1000);
        assert_eq!(default_poll_interval_ms(), 2);
        assert_eq!(default_device_address(), 0xC8);
        assert_eq!(default_max_frame_size(), 64);
        assert_eq!(default_median_window(), 3);
        assert!(!default_telemetry_enabled());
        assert_eq!(default_log_dir(), "./logs");
        assert_eq!(default_max_records_per_file(), 10000);
    }

    #[test]
    fn test_session_config_from_defaults_matches_session_default() {
        assert_eq!(SessionConfig::from(&Config::default()), SessionConfig::default());
    }

    #[test]
    fn test_session_config_from_values() {
        let mut config = Config::default();
        config.crsf.device_address = 0xEE;
        config.filter.median_window = 5;
        config.serial.poll_interval_ms = 10;
        config.serial.command_timeout_ms = 250;

        let session = SessionConfig::from(&config);
        assert_eq!(session.device_address, 0xEE);
        assert_eq!(session.median_window, 5);
        assert_eq!(session.poll_interval, Duration::from_millis(10));
        assert_eq!(session.command_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[serial]
port = "/dev/ttyUSB0"
baud_rate = 420000

[crsf]
device_address = 0xEE

[filter]
median_window = 5
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 420000);
        assert_eq!(config.serial.command_timeout_ms, 1000);
        assert_eq!(config.crsf.device_address, 0xEE);
        assert_eq!(config.filter.median_window, 5);
        assert!(!config.telemetry.enabled);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/fc-link.toml");
        assert!(matches!(result, Err(FcLinkError::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = Config::from_toml("[serial\nport = ");
        assert!(matches!(result, Err(FcLinkError::Config(_))));
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let result = Config::from_toml("[filter]\nmedian_window = 0\n");
        assert!(matches!(result, Err(FcLinkError::Config(_))));
    }

    #[test]
    fn test_empty_serial_port() {
        let mut config = Config::default();
        config.serial.port = String::new();
        assert_invalid(config, "serial port");
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = Config::default();
        config.serial.baud_rate = 9600;
        assert_invalid(config, "baud_rate");
    }

    #[test]
    fn test_valid_baud_rates() {
        for &baud in SUPPORTED_BAUD_RATES {
            let mut config = Config::default();
            config.serial.baud_rate = baud;
            assert!(config.validate().is_ok(), "baud {} should be valid", baud);
        }
    }

    #[test]
    fn test_command_timeout_bounds() {
        let mut config = Config::default();
        config.serial.command_timeout_ms = 0;
        assert_invalid(config.clone(), "command_timeout_ms");

        config.serial.command_timeout_ms = 10001;
        assert_invalid(config.clone(), "command_timeout_ms");

        config.serial.command_timeout_ms = 10000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_poll_interval_bounds() {
        let mut config = Config::default();
        config.serial.poll_interval_ms = 0;
        assert_invalid(config.clone(), "poll_interval_ms");

        config.serial.poll_interval_ms = 1001;
        assert_invalid(config, "poll_interval_ms");
    }

    #[test]
    fn test_max_frame_size_bounds() {
        let mut config = Config::default();
        config.crsf.max_frame_size = 5;
        assert_invalid(config.clone(), "max_frame_size");

        config.crsf.max_frame_size = 65;
        assert_invalid(config.clone(), "max_frame_size");

        config.crsf.max_frame_size = 6;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_median_window_bounds() {
        let mut config = Config::default();
        config.filter.median_window = 16;
        assert_invalid(config.clone(), "median_window");

        config.filter.median_window = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_log_dir_when_enabled() {
        let mut config = Config::default();
        config.telemetry.enabled = true;
        config.telemetry.log_dir = String::new();
        assert_invalid(config, "log_dir");
    }

    #[test]
    fn test_empty_log_dir_when_disabled() {
        let mut config = Config::default();
        config.telemetry.log_dir = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_records_per_file_zero() {
        let mut config = Config::default();
        config.telemetry.max_records_per_file = 0;
        assert_invalid(config, "max_records_per_file");
    }
}
