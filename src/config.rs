//! Session, discovery and upgrade configuration.
//!
//! There is no configuration file; every value has a default matching the
//! device library's behaviour and can be overridden with the `with_*` builders.

use std::time::Duration;

use crate::types::{CONTROL_PORT, VIDEO_DATA_BUFFER_SIZE_1S};

/// Discovery configuration.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Destination UDP port for probes.
    pub port: u16,
    /// How long to collect replies after each probe.
    pub window: Duration,
    /// Number of probes sent.
    pub attempts: u32,
    /// Upper bound on collected replies; extras are dropped.
    pub max_replies: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: CONTROL_PORT,
            window: Duration::from_millis(200),
            attempts: 2,
            max_replies: 64,
        }
    }
}

impl DiscoveryConfig {
    /// Set the destination port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the reply window per probe.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the number of probes.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the reply bound.
    pub fn with_max_replies(mut self, max: usize) -> Self {
        self.max_replies = max;
        self
    }
}

/// Firmware upgrade reboot-wait configuration.
#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    /// Minimum delay after upload before the first poll.
    pub settle_delay: Duration,
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Maximum number of polls before giving up.
    pub max_attempts: u32,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            max_attempts: 30,
        }
    }
}

impl UpgradeConfig {
    /// Set the settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the attempt bound.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

/// Timing for [`wait_for_lock`](crate::DeviceSession::wait_for_lock).
#[derive(Debug, Clone)]
pub struct WaitForLockConfig {
    /// Delay before the first status read so the signal strength is valid.
    pub settle_delay: Duration,
    /// Delay between status reads.
    pub poll_interval: Duration,
    /// Give up waiting for a definitive lock after this long.
    pub timeout: Duration,
}

impl Default for WaitForLockConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(250),
            poll_interval: Duration::from_millis(250),
            timeout: Duration::from_millis(2500),
        }
    }
}

/// Per-session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// TCP port for control connections.
    pub control_port: u16,
    /// Control connection timeout.
    pub connect_timeout: Duration,
    /// Control reply timeout.
    pub reply_timeout: Duration,
    /// Reply timeout for the end of a firmware upload.
    pub upgrade_reply_timeout: Duration,
    /// Firmware upload chunk size.
    pub upgrade_chunk_size: usize,
    /// Stream buffer capacity in bytes.
    pub stream_buffer_size: usize,
    /// How long the stream producer blocks on the video socket per read.
    pub video_poll_timeout: Duration,
    /// Discovery settings used to resolve unknown device IDs or addresses.
    pub discovery: DiscoveryConfig,
    /// Wait-for-lock timing.
    pub wait_for_lock: WaitForLockConfig,
    /// Firmware upgrade timing.
    pub upgrade: UpgradeConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            control_port: CONTROL_PORT,
            connect_timeout: Duration::from_millis(2500),
            reply_timeout: Duration::from_millis(2500),
            upgrade_reply_timeout: Duration::from_secs(20),
            upgrade_chunk_size: 256,
            stream_buffer_size: VIDEO_DATA_BUFFER_SIZE_1S,
            video_poll_timeout: Duration::from_millis(100),
            discovery: DiscoveryConfig::default(),
            wait_for_lock: WaitForLockConfig::default(),
            upgrade: UpgradeConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Set the control port.
    pub fn with_control_port(mut self, port: u16) -> Self {
        self.control_port = port;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the reply timeout.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Set the stream buffer capacity.
    pub fn with_stream_buffer_size(mut self, size: usize) -> Self {
        self.stream_buffer_size = size;
        self
    }

    /// Set the discovery configuration.
    pub fn with_discovery(mut self, config: DiscoveryConfig) -> Self {
        self.discovery = config;
        self
    }

    /// Set the wait-for-lock timing.
    pub fn with_wait_for_lock(mut self, config: WaitForLockConfig) -> Self {
        self.wait_for_lock = config;
        self
    }

    /// Set the firmware upgrade timing.
    pub fn with_upgrade(mut self, config: UpgradeConfig) -> Self {
        self.upgrade = config;
        self
    }
}
