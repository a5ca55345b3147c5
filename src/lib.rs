//! # FC Link Library
//!
//! MSP command and CRSF telemetry engine for a flight controller on a serial link.
//!
//! One [`ProtocolSession`] owns the transport. MSP round trips are serialized
//! through it while the CRSF stream is parsed into smoothed channel values and
//! telemetry events.
//!
//! ```no_run
//! use fc_link::msp::protocol::{commands, MspStatus};
//! use fc_link::serial::TokioSerialPort;
//! use fc_link::{Config, ProtocolSession, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let port = TokioSerialPort::open(&config.serial)?;
//!     let session = ProtocolSession::new(port, SessionConfig::from(&config));
//!
//!     let reply = session.request(commands::MSP_STATUS, &[]).await?;
//!     println!("armed: {}", MspStatus::parse(&reply.payload)?.armed());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod crsf;
pub mod msp;
pub mod filter;
pub mod serial;
pub mod session;
pub mod telemetry;

pub use config::Config;
pub use error::{DecodeError, FcLinkError, FramingError, MspError};
pub use msp::framer::encode_request as encode_msp_request;
pub use session::{Event, ProtocolSession, SessionConfig};
