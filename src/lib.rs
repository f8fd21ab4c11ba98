//! HDHomeRun tuner client built on std::net.
//!
//! This crate provides a synchronous client for HDHomeRun network tuner
//! appliances: finding devices on the LAN, reading and writing their
//! control variables, claiming a tuner, receiving its MPEG-TS output and
//! upgrading firmware.
//!
//! # Features
//!
//! - UDP broadcast and unicast discovery
//! - Get/set of named device variables over the TCP control channel
//! - Tuner lock keys with automatic release on drop
//! - Unicast and multicast video reception into a ring buffer
//! - Firmware upload with a bounded wait for the device to reboot
//! - Pluggable [`Transport`] so sessions can run against a simulated device
//!
//! # Example
//!
//! ```no_run
//! use hdhomerun_rs::{discover, DeviceSession, DiscoveryConfig, NetTransport};
//!
//! let devices = discover(&NetTransport, None, &DiscoveryConfig::default()).unwrap();
//! let device = devices.first().expect("no devices found");
//!
//! let mut session = DeviceSession::from_descriptor(device, 0).unwrap();
//! session.lock_request().unwrap();
//! session.set_tuner_channel("auto:503000000").unwrap();
//!
//! let status = session.wait_for_lock().unwrap();
//! println!("{}: ss={} snq={}", session.name(), status.signal_strength, status.signal_to_noise_quality);
//!
//! session.stream_start().unwrap();
//! if let Some(data) = session.stream_recv(65536) {
//!     println!("received {} bytes", data.len());
//! }
//! ```
//!
//! # Protocol Overview
//!
//! Control and discovery packets share one framing:
//!
//! ```text
//! +--------+--------+--------+--------+
//! |      Type       |     Length      |  (4 bytes, big-endian)
//! +--------+--------+--------+--------+
//! | Tag | Len (1-2) |  Value ...      |  (repeated TLVs)
//! +--------+--------+--------+--------+
//! |          CRC-32 (little-endian)   |  (4 bytes)
//! +--------+--------+--------+--------+
//! ```

pub mod clock;
pub mod codec;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod exchange;
pub mod packet;
pub mod session;
pub mod status;
pub mod stream;
pub mod transport;
pub mod types;
pub mod upgrade;

// Async facade (requires tokio feature)
#[cfg(feature = "tokio")]
pub mod session_async;

#[cfg(test)]
mod testing;

// Re-export commonly used types at the crate root
pub use clock::{CancelToken, Clock, SystemClock};
pub use config::{DiscoveryConfig, SessionConfig, UpgradeConfig, WaitForLockConfig};
pub use device::{format_ip_addr, parse_ip_addr, DeviceDescriptor, DeviceId};
pub use discovery::discover;
pub use error::{ErrorKind, HdhrError, Result, UpgradeFailure};
pub use session::{DeviceSession, LockState};
pub use status::{PlotSample, TunerStatus, TunerVStatus};
pub use stream::StreamStats;
pub use transport::{NetTransport, Transport};
pub use types::{DeviceType, PacketType, CONTROL_PORT};
pub use upgrade::{UpgradeSequencer, UpgradeState};

#[cfg(feature = "tokio")]
pub use session_async::AsyncDeviceSession;
