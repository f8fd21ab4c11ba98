//! Firmware upgrade sequencing.
//!
//! ```text
//! Idle -> Uploading -> WaitingForReboot -> Done
//!            |               |
//!            +---> Failed <--+
//! ```
//!
//! Upload failures end the sequence before any wait. The reboot wait is a
//! bounded poll driven by an injectable [`Clock`] and can be aborted with a
//! [`CancelToken`].

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::clock::{CancelToken, Clock, SystemClock};
use crate::config::UpgradeConfig;
use crate::error::{ErrorKind, HdhrError, Result, UpgradeFailure};

/// Default rejection reason for an upload.
pub const REJECTED_UPGRADE: &str = "the hdhomerun device rejected the firmware upgrade";

/// Longest single sleep, so cancellation is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Progress of an upgrade sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    /// Not started.
    Idle,
    /// Sending the image.
    Uploading,
    /// Image accepted; polling for the device to come back.
    WaitingForReboot {
        /// Polls made so far.
        attempts: u32,
    },
    /// Finished successfully.
    Done,
    /// Terminated without success.
    Failed,
}

/// The device operations an upgrade needs.
pub trait UpgradeTarget {
    /// Send the whole image and return the device's verdict.
    fn upload(&mut self, image: &[u8]) -> Result<()>;

    /// A cheap query that succeeds once the device is reachable again.
    fn probe(&mut self) -> Result<String>;
}

/// Read an image source completely.
///
/// The source is only read here, so the caller can drop it before any
/// network activity. Read failures are local I/O errors.
pub fn read_image(source: &mut dyn Read) -> Result<Vec<u8>> {
    let mut image = Vec::new();
    source.read_to_end(&mut image).map_err(HdhrError::LocalIo)?;
    Ok(image)
}

/// Drives one firmware upgrade.
pub struct UpgradeSequencer {
    config: UpgradeConfig,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
    state: UpgradeState,
}

impl UpgradeSequencer {
    /// Create a sequencer using the system clock.
    pub fn new(config: UpgradeConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            cancel: CancelToken::new(),
            state: UpgradeState::Idle,
        }
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share a cancellation token with the caller.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The token that aborts the reboot wait.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Current state.
    pub fn state(&self) -> UpgradeState {
        self.state
    }

    /// Upload `image` and optionally wait for the device to reboot.
    pub fn run(&mut self, target: &mut dyn UpgradeTarget, image: &[u8], wait: bool) -> Result<()> {
        self.state = UpgradeState::Uploading;
        info!("uploading {} byte firmware image", image.len());

        if let Err(e) = target.upload(image) {
            warn!("firmware upload failed: {e}");
            self.state = UpgradeState::Failed;
            return Err(e);
        }

        if !wait {
            self.state = UpgradeState::Done;
            return Ok(());
        }

        self.wait_for_reboot(target)
    }

    fn wait_for_reboot(&mut self, target: &mut dyn UpgradeTarget) -> Result<()> {
        let max_attempts = self.config.max_attempts;
        self.state = UpgradeState::WaitingForReboot { attempts: 0 };
        debug!("waiting {:?} for device to reboot", self.config.settle_delay);
        self.sleep(self.config.settle_delay, 0)?;

        for attempt in 1..=max_attempts {
            self.check_cancelled(attempt - 1)?;
            self.state = UpgradeState::WaitingForReboot { attempts: attempt };

            match target.probe() {
                Ok(version) => {
                    info!("device back after upgrade, version {version}");
                    self.state = UpgradeState::Done;
                    return Ok(());
                }
                Err(e) if e.kind() != ErrorKind::Communication => {
                    info!("device answering again after upgrade: {e}");
                    self.state = UpgradeState::Done;
                    return Ok(());
                }
                Err(e) => trace!("reboot poll {attempt}/{max_attempts}: {e}"),
            }

            if attempt < max_attempts {
                self.sleep(self.config.poll_interval, attempt)?;
            }
        }

        warn!("device did not reappear after {max_attempts} polls");
        self.state = UpgradeState::Failed;
        Err(UpgradeFailure::DeviceNotFound {
            attempts: max_attempts,
        }
        .into())
    }

    fn sleep(&mut self, duration: Duration, attempts: u32) -> Result<()> {
        let mut remaining = duration;
        while !remaining.is_zero() {
            self.check_cancelled(attempts)?;
            let slice = remaining.min(SLEEP_SLICE);
            self.clock.sleep(slice);
            remaining -= slice;
        }
        Ok(())
    }

    /// End the sequence as failed before it started, e.g. when the image
    /// could not be read.
    pub(crate) fn abort(&mut self) {
        self.state = UpgradeState::Failed;
    }

    fn check_cancelled(&mut self, attempts: u32) -> Result<()> {
        if self.cancel.is_cancelled() {
            debug!("reboot wait cancelled after {attempts} polls");
            self.state = UpgradeState::Failed;
            return Err(UpgradeFailure::Cancelled { attempts }.into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for UpgradeSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeSequencer")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::manual::ManualClock;
    use std::io;

    struct Device {
        upload: Option<HdhrError>,
        rejects_version: bool,
        offline_polls: u32,
        uploads: usize,
        probes: u32,
    }

    impl Device {
        fn new(offline_polls: u32) -> Self {
            Self {
                upload: None,
                rejects_version: false,
                offline_polls,
                uploads: 0,
                probes: 0,
            }
        }
    }

    impl UpgradeTarget for Device {
        fn upload(&mut self, _image: &[u8]) -> Result<()> {
            self.uploads += 1;
            match self.upload.take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn probe(&mut self) -> Result<String> {
            self.probes += 1;
            if self.probes <= self.offline_polls {
                Err(HdhrError::communication(io::Error::from(io::ErrorKind::ConnectionRefused)))
            } else if self.rejects_version {
                Err(HdhrError::rejected(None, "ERROR: unknown getset variable"))
            } else {
                Ok("20230713".to_string())
            }
        }
    }

    fn sequencer(clock: &Arc<ManualClock>) -> UpgradeSequencer {
        UpgradeSequencer::new(UpgradeConfig::default()).with_clock(clock.clone())
    }

    #[test]
    fn test_no_wait_is_done_after_upload() {
        let clock = Arc::new(ManualClock::new());
        let mut seq = sequencer(&clock);
        let mut device = Device::new(u32::MAX);

        seq.run(&mut device, b"image", false).unwrap();
        assert_eq!(seq.state(), UpgradeState::Done);
        assert_eq!(device.probes, 0);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_device_returns() {
        let clock = Arc::new(ManualClock::new());
        let mut seq = sequencer(&clock);
        let mut device = Device::new(3);

        seq.run(&mut device, b"image", true).unwrap();
        assert_eq!(seq.state(), UpgradeState::Done);
        assert_eq!(device.probes, 4);
        assert_eq!(clock.elapsed(), Duration::from_secs(13));
    }

    #[test]
    fn test_bounded_poll_fails() {
        let clock = Arc::new(ManualClock::new());
        let mut seq = sequencer(&clock);
        let mut device = Device::new(u32::MAX);

        let err = seq.run(&mut device, b"image", true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpgradeFailed);
        assert!(matches!(
            err,
            HdhrError::Upgrade(UpgradeFailure::DeviceNotFound { attempts: 30 })
        ));
        assert_eq!(seq.state(), UpgradeState::Failed);
        assert_eq!(device.probes, 30);
        assert_eq!(clock.elapsed(), Duration::from_secs(10 + 29));
    }

    #[test]
    fn test_rejected_upload_never_waits() {
        let clock = Arc::new(ManualClock::new());
        let mut seq = sequencer(&clock);
        let mut device = Device::new(0);
        device.upload = Some(HdhrError::rejected(None, REJECTED_UPGRADE));

        let err = seq.run(&mut device, b"image", true).unwrap_err();
        assert_eq!(err.reason(), Some(REJECTED_UPGRADE));
        assert_eq!(seq.state(), UpgradeState::Failed);
        assert_eq!(device.uploads, 1);
        assert_eq!(device.probes, 0);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_answering_device_is_back_even_if_it_rejects() {
        let clock = Arc::new(ManualClock::new());
        let mut seq = sequencer(&clock);
        let mut device = Device::new(2);
        device.rejects_version = true;

        seq.run(&mut device, b"image", true).unwrap();
        assert_eq!(seq.state(), UpgradeState::Done);
        assert_eq!(device.probes, 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(12));
    }

    #[test]
    fn test_upload_communication_failure_never_waits() {
        let clock = Arc::new(ManualClock::new());
        let mut seq = sequencer(&clock);
        let mut device = Device::new(0);
        device.upload = Some(HdhrError::communication(io::Error::from(
            io::ErrorKind::ConnectionReset,
        )));

        let err = seq.run(&mut device, b"image", true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Communication);
        assert_eq!(seq.state(), UpgradeState::Failed);
        assert_eq!(device.probes, 0);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_cancelled_wait() {
        let clock = Arc::new(ManualClock::new());
        let cancel = CancelToken::new();
        let mut seq = sequencer(&clock).with_cancel_token(cancel.clone());
        let mut device = Device::new(u32::MAX);

        cancel.cancel();
        let err = seq.run(&mut device, b"image", true).unwrap_err();
        assert!(matches!(
            err,
            HdhrError::Upgrade(UpgradeFailure::Cancelled { attempts: 0 })
        ));
        assert_eq!(seq.state(), UpgradeState::Failed);
        assert_eq!(device.probes, 0);
    }

    #[test]
    fn test_read_image_failure_is_local_io() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("disk error"))
            }
        }

        let err = read_image(&mut Broken).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LocalIo);
        assert_eq!(read_image(&mut &b"abc"[..]).unwrap(), b"abc");
    }
}
