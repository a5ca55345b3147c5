//! # FC Link
//!
//! Talks to a flight controller over serial: one MSP status query, then the
//! CRSF stream is followed until Ctrl+C.
//!
//! ```bash
//! fc-link [config.toml]
//! ```
//!
//! Expected output:
//! ```text
//! INFO fc_link: FC Link v0.1.0 starting...
//! INFO fc_link::serial: Opened flight controller at /dev/ttyACM0 (115200 baud)
//! INFO fc_link: Flight controller status: armed=false cycle_time=3500us
//! INFO fc_link: 500 channel updates, last ch1-4 = [1500, 1500, 988, 1500]
//! ```

use anyhow::{Context, Result};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use fc_link::msp::protocol::{commands, MspStatus};
use fc_link::serial::TokioSerialPort;
use fc_link::telemetry::TelemetryLogger;
use fc_link::{Config, Event, ProtocolSession, SessionConfig};

/// Channel updates between status log messages
const LOG_INTERVAL_UPDATES: u64 = 500;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .init();

    info!("FC Link v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).with_context(|| format!("loading config from {}", path))?,
        None => Config::default(),
    };

    let port = TokioSerialPort::open(&config.serial)?;
    info!("Serial port opened at: {}", port.device_path());

    let session = ProtocolSession::new(port, SessionConfig::from(&config));

    match session.request(commands::MSP_STATUS, &[]).await {
        Ok(reply) => match MspStatus::parse(&reply.payload) {
            Ok(status) => info!(
                "Flight controller status: armed={} cycle_time={}us",
                status.armed(),
                status.cycle_time
            ),
            Err(e) => warn!("Malformed MSP_STATUS reply: {}", e),
        },
        Err(e) => warn!("MSP_STATUS failed: {}", e),
    }

    let mut telemetry = if config.telemetry.enabled {
        Some(TelemetryLogger::new(&config.telemetry.log_dir, config.telemetry.max_records_per_file)?)
    } else {
        None
    };

    let mut poll_interval = interval(Duration::from_millis(config.serial.poll_interval_ms));
    let mut updates: u64 = 0;

    info!("Following CRSF stream, press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = poll_interval.tick() => {
                let events = match session.poll().await {
                    Ok(events) => events,
                    Err(e) => {
                        error!("Serial link failed: {}", e);
                        break;
                    }
                };

                for event in &events {
                    match event {
                        Event::ChannelUpdate(set) => {
                            updates += 1;
                            if updates % LOG_INTERVAL_UPDATES == 0 {
                                info!("{} channel updates, last ch1-4 = {:?}", updates, &set.channels[..4]);
                            }
                        }
                        Event::LinkStats(stats) => {
                            debug!("Link: LQ {}% RSSI -{}dBm", stats.uplink_lq, stats.uplink_rssi_1);
                        }
                        other => debug!("{:?}", other),
                    }

                    if let Some(logger) = telemetry.as_mut() {
                        if let Err(e) = logger.log_event(event) {
                            warn!("Telemetry recording stopped: {}", e);
                            telemetry = None;
                        }
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    if let Some(logger) = telemetry.as_mut() {
        logger.flush()?;
    }

    let stats = session.stats();
    info!(
        "Total channel updates: {} (frames {}, crc errors {}, bytes discarded {})",
        updates, stats.frames, stats.crc_errors, stats.bytes_discarded
    );

    Ok(())
}
