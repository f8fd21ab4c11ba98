//! Device sessions.
//!
//! A [`DeviceSession`] is the handle to one tuner on one device. It owns the
//! control connection, the last known lock state and, while streaming, the
//! stream buffer. Sessions are not shared: clone one to get an independent
//! handle to the same device.

mod lock;
mod state;
mod streaming;

pub use lock::{REJECTED_FORCE, REJECTED_LOCK, REJECTED_UNLOCK, REJECTED_WAIT_FOR_LOCK};
pub use state::LockState;
pub use streaming::REJECTED_STREAM_START;

use std::io;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};

use crate::config::SessionConfig;
use crate::device::{DeviceDescriptor, DeviceId};
use crate::discovery;
use crate::error::{HdhrError, Result};
use crate::exchange::VariableExchange;
use crate::status::{parse_number, PlotSample, TunerStatus, TunerVStatus};
use crate::stream::StreamWorker;
use crate::transport::{NetTransport, Transport};
use crate::upgrade::{read_image, UpgradeSequencer, UpgradeTarget, REJECTED_UPGRADE};

/// Handle to one tuner on one device.
pub struct DeviceSession {
    requested: DeviceDescriptor,
    descriptor: DeviceDescriptor,
    tuner: u32,
    lock: LockState,
    exchange: VariableExchange,
    multicast: Option<(Ipv4Addr, u16)>,
    stream: Option<StreamWorker>,
}

impl DeviceSession {
    /// Create a session for `tuner` on the device with the given ID and address.
    ///
    /// Either the ID or the address may be unknown (`0`); it is resolved by
    /// discovery when first needed.
    pub fn new(device_id: u32, device_ip: u32, tuner_count: u32, tuner: u32) -> Result<Self> {
        Self::from_descriptor(&DeviceDescriptor::new(device_id, device_ip, tuner_count), tuner)
    }

    /// Create a session from a discovered descriptor.
    pub fn from_descriptor(descriptor: &DeviceDescriptor, tuner: u32) -> Result<Self> {
        Self::with_transport(
            *descriptor,
            tuner,
            Arc::new(NetTransport::new()),
            SessionConfig::default(),
        )
    }

    /// Create a session using a custom transport and configuration.
    pub fn with_transport(
        descriptor: DeviceDescriptor,
        tuner: u32,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> Result<Self> {
        validate_device(descriptor.device_id, descriptor.device_ip)?;
        validate_tuner(tuner, descriptor.tuner_count)?;

        debug!("session for {descriptor} tuner {tuner}");
        Ok(Self {
            requested: descriptor,
            descriptor,
            tuner,
            lock: LockState::Unlocked,
            exchange: VariableExchange::new(transport, config),
            multicast: None,
            stream: None,
        })
    }

    /// Name in the form `1010ABCD-0`, or `192.168.1.10-0` when the ID is unknown.
    pub fn name(&self) -> String {
        if self.descriptor.device_id.is_wildcard() {
            format!("{}-{}", self.descriptor.ip(), self.tuner)
        } else {
            format!("{}-{}", self.descriptor.device_id, self.tuner)
        }
    }

    /// Device ID, resolved by discovery if it was not supplied.
    pub fn device_id(&mut self) -> Result<DeviceId> {
        if self.descriptor.device_id.is_wildcard() {
            let ip = self.resolve_ip()?;
            let found = discovery::find_device(
                self.exchange.transport().as_ref(),
                Some(ip),
                DeviceId::WILDCARD,
                &self.exchange.config().discovery,
            )?
            .ok_or_else(|| not_found(&ip.to_string()))?;
            self.descriptor.device_id = found.device_id;
        }
        Ok(self.descriptor.device_id)
    }

    /// Device address, resolved by discovery if it was not supplied.
    pub fn device_ip(&mut self) -> Result<u32> {
        self.resolve_ip().map(u32::from)
    }

    /// Device ID as supplied at construction or by [`set_device`](Self::set_device).
    pub fn device_id_requested(&self) -> DeviceId {
        self.requested.device_id
    }

    /// Device address as supplied at construction or by [`set_device`](Self::set_device).
    pub fn device_ip_requested(&self) -> u32 {
        self.requested.device_ip
    }

    /// Selected tuner index.
    pub fn tuner(&self) -> u32 {
        self.tuner
    }

    /// Number of tuners on the device.
    pub fn tuner_count(&self) -> u32 {
        self.descriptor.tuner_count
    }

    /// The device as currently known, including resolved halves.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Last known lock state.
    pub fn lock_state(&self) -> LockState {
        self.lock
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        self.exchange.config()
    }

    /// Multicast group and port used for streaming, if set.
    pub fn multicast(&self) -> Option<(Ipv4Addr, u16)> {
        self.multicast
    }

    /// Read any named variable.
    pub fn get_var(&mut self, name: &str) -> Result<String> {
        let ip = self.resolve_ip()?;
        self.exchange.get(ip, name)
    }

    /// Write any named variable. The lock key is attached while locked.
    pub fn set_var(&mut self, name: &str, value: &str) -> Result<()> {
        let ip = self.resolve_ip()?;
        self.exchange.set(ip, name, value, self.lock.lockkey())
    }

    /// Point the session at another device.
    ///
    /// A held lock is released best-effort and any stream is stopped first.
    pub fn set_device(&mut self, device_id: u32, device_ip: u32) -> Result<()> {
        validate_device(DeviceId(device_id), device_ip)?;
        self.detach();
        self.exchange.disconnect();

        let descriptor = DeviceDescriptor::new(device_id, device_ip, self.descriptor.tuner_count);
        self.requested = descriptor;
        self.descriptor = descriptor;
        self.multicast = None;
        Ok(())
    }

    /// Select another tuner.
    ///
    /// A held lock is released best-effort and any stream is stopped first.
    pub fn set_tuner(&mut self, tuner: u32) -> Result<()> {
        validate_tuner(tuner, self.descriptor.tuner_count)?;
        if tuner != self.tuner {
            self.detach();
            self.tuner = tuner;
        }
        Ok(())
    }

    /// Select a tuner from `0`, `tuner0` or `/tuner0`.
    pub fn set_tuner_from_str(&mut self, tuner: &str) -> Result<()> {
        let invalid = || HdhrError::invalid_argument(format!("invalid tuner: {tuner:?}"));
        let digits = tuner
            .strip_prefix("/tuner")
            .or_else(|| tuner.strip_prefix("tuner"))
            .unwrap_or(tuner);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let index = digits.parse::<u32>().map_err(|_| invalid())?;
        self.set_tuner(index)
    }

    /// Stream from a multicast group instead of a unicast target.
    ///
    /// The device is expected to already be sending to the group.
    pub fn set_multicast(&mut self, multicast_ip: u32, multicast_port: u16) -> Result<()> {
        let group = Ipv4Addr::from(multicast_ip);
        if !group.is_multicast() {
            return Err(HdhrError::invalid_argument(format!(
                "{group} is not a multicast address"
            )));
        }
        if multicast_port == 0 {
            return Err(HdhrError::invalid_argument("multicast port must be non-zero"));
        }
        self.detach();
        self.multicast = Some((group, multicast_port));
        Ok(())
    }

    /// Current tuner status.
    pub fn tuner_status(&mut self) -> Result<TunerStatus> {
        let name = self.tuner_var("status");
        self.get_var(&name).map(|s| TunerStatus::parse(&s))
    }

    /// Out-of-band tuner status.
    pub fn oob_status(&mut self) -> Result<TunerStatus> {
        self.get_var("/oob/status").map(|s| TunerStatus::parse(&s))
    }

    /// Virtual channel status.
    pub fn tuner_vstatus(&mut self) -> Result<TunerVStatus> {
        let name = self.tuner_var("vstatus");
        self.get_var(&name).map(|s| TunerVStatus::parse(&s))
    }

    /// Program table of the current channel.
    pub fn tuner_streaminfo(&mut self) -> Result<String> {
        let name = self.tuner_var("streaminfo");
        self.get_var(&name)
    }

    /// Current channel.
    pub fn tuner_channel(&mut self) -> Result<String> {
        let name = self.tuner_var("channel");
        self.get_var(&name)
    }

    /// Current virtual channel.
    pub fn tuner_vchannel(&mut self) -> Result<String> {
        let name = self.tuner_var("vchannel");
        self.get_var(&name)
    }

    /// Current channel map.
    pub fn tuner_channelmap(&mut self) -> Result<String> {
        let name = self.tuner_var("channelmap");
        self.get_var(&name)
    }

    /// Current PID filter.
    pub fn tuner_filter(&mut self) -> Result<String> {
        let name = self.tuner_var("filter");
        self.get_var(&name)
    }

    /// Current program.
    pub fn tuner_program(&mut self) -> Result<String> {
        let name = self.tuner_var("program");
        self.get_var(&name)
    }

    /// Current stream target.
    pub fn tuner_target(&mut self) -> Result<String> {
        let name = self.tuner_var("target");
        self.get_var(&name)
    }

    /// Constellation samples.
    pub fn tuner_plotsample(&mut self) -> Result<Vec<PlotSample>> {
        let name = self.tuner_var("plotsample");
        self.get_var(&name).map(|s| PlotSample::parse_list(&s))
    }

    /// Out-of-band constellation samples.
    pub fn oob_plotsample(&mut self) -> Result<Vec<PlotSample>> {
        self.get_var("/oob/plotsample").map(|s| PlotSample::parse_list(&s))
    }

    /// Address of the client holding the tuner lock, or `none`.
    pub fn tuner_lockkey_owner(&mut self) -> Result<String> {
        let name = self.tuner_var("lockkey");
        self.get_var(&name)
    }

    /// IR receiver target.
    pub fn ir_target(&mut self) -> Result<String> {
        self.get_var("/ir/target")
    }

    /// Firmware version string and its numeric form.
    pub fn version(&mut self) -> Result<(String, u32)> {
        let version = self.get_var("/sys/version")?;
        let number = parse_number(&version);
        Ok((version, number))
    }

    /// Full feature list.
    pub fn features(&mut self) -> Result<String> {
        self.get_var("/sys/features")
    }

    /// The feature line starting with `prefix`, e.g. `channelmap:`.
    pub fn supported(&mut self, prefix: &str) -> Result<Option<String>> {
        let features = self.features()?;
        Ok(features
            .lines()
            .find(|line| line.starts_with(prefix))
            .map(str::to_string))
    }

    /// Model string.
    pub fn model(&mut self) -> Result<String> {
        self.get_var("/sys/model")
    }

    /// Hardware model string.
    pub fn hw_model(&mut self) -> Result<String> {
        self.get_var("/sys/hwmodel")
    }

    /// Tune to a channel, e.g. `auto:503000000`.
    pub fn set_tuner_channel(&mut self, channel: &str) -> Result<()> {
        let name = self.tuner_var("channel");
        self.set_var(&name, channel)
    }

    /// Tune to a virtual channel.
    pub fn set_tuner_vchannel(&mut self, vchannel: &str) -> Result<()> {
        let name = self.tuner_var("vchannel");
        self.set_var(&name, vchannel)
    }

    /// Select the channel map, e.g. `us-bcast`.
    pub fn set_tuner_channelmap(&mut self, channelmap: &str) -> Result<()> {
        let name = self.tuner_var("channelmap");
        self.set_var(&name, channelmap)
    }

    /// Set the PID filter.
    pub fn set_tuner_filter(&mut self, filter: &str) -> Result<()> {
        let name = self.tuner_var("filter");
        self.set_var(&name, filter)
    }

    /// Select a program.
    pub fn set_tuner_program(&mut self, program: &str) -> Result<()> {
        let name = self.tuner_var("program");
        self.set_var(&name, program)
    }

    /// Set the stream target, e.g. `udp://192.168.1.50:5000` or `none`.
    pub fn set_tuner_target(&mut self, target: &str) -> Result<()> {
        let name = self.tuner_var("target");
        self.set_var(&name, target)
    }

    /// Set the IR receiver target.
    pub fn set_ir_target(&mut self, target: &str) -> Result<()> {
        self.set_var("/ir/target", target)
    }

    /// Upload a firmware image and optionally wait for the device to reboot.
    pub fn upgrade(&mut self, path: impl AsRef<Path>, wait: bool) -> Result<()> {
        let mut sequencer = UpgradeSequencer::new(self.config().upgrade.clone());
        self.upgrade_with(&mut sequencer, path, wait)
    }

    /// Upgrade using a caller-supplied sequencer, e.g. with its own clock or
    /// cancel token.
    pub fn upgrade_with(
        &mut self,
        sequencer: &mut UpgradeSequencer,
        path: impl AsRef<Path>,
        wait: bool,
    ) -> Result<()> {
        let (image, device_ip) = match self.prepare_upgrade(path.as_ref()) {
            Ok(prepared) => prepared,
            Err(e) => {
                sequencer.abort();
                return Err(e);
            }
        };

        let mut target = SessionUpgrade {
            exchange: &mut self.exchange,
            device_ip,
        };
        sequencer.run(&mut target, &image, wait)
    }

    fn prepare_upgrade(&mut self, path: &Path) -> Result<(Vec<u8>, Ipv4Addr)> {
        let image = {
            let mut source = self
                .exchange
                .transport()
                .open_image(path)
                .map_err(HdhrError::LocalIo)?;
            read_image(&mut source)?
        };
        let device_ip = self.resolve_ip()?;
        Ok((image, device_ip))
    }

    fn tuner_var(&self, var: &str) -> String {
        format!("/tuner{}/{var}", self.tuner)
    }

    fn resolve_ip(&mut self) -> Result<Ipv4Addr> {
        if self.descriptor.device_ip == 0 {
            let device_id = self.descriptor.device_id;
            let found = discovery::find_device(
                self.exchange.transport().as_ref(),
                None,
                device_id,
                &self.exchange.config().discovery,
            )?
            .ok_or_else(|| not_found(&device_id.to_string()))?;
            debug!("resolved {device_id} to {}", found.ip());
            self.descriptor.device_ip = found.device_ip;
        }
        Ok(self.descriptor.ip())
    }

    /// Stop streaming and release the lock, swallowing failures.
    fn detach(&mut self) {
        self.stream_stop();
        self.release_best_effort();
    }
}

impl Clone for DeviceSession {
    /// A new handle to the same device and tuner, unlocked and not streaming.
    fn clone(&self) -> Self {
        Self {
            requested: self.requested,
            descriptor: self.descriptor,
            tuner: self.tuner,
            lock: LockState::Unlocked,
            exchange: VariableExchange::new(
                Arc::clone(self.exchange.transport()),
                self.exchange.config().clone(),
            ),
            multicast: self.multicast,
            stream: None,
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("descriptor", &self.descriptor)
            .field("tuner", &self.tuner)
            .field("lock", &self.lock)
            .field("multicast", &self.multicast)
            .field("streaming", &self.stream.is_some())
            .finish()
    }
}

struct SessionUpgrade<'a> {
    exchange: &'a mut VariableExchange,
    device_ip: Ipv4Addr,
}

impl UpgradeTarget for SessionUpgrade<'_> {
    fn upload(&mut self, image: &[u8]) -> Result<()> {
        self.exchange.upgrade(self.device_ip, image, REJECTED_UPGRADE)
    }

    fn probe(&mut self) -> Result<String> {
        self.exchange.get(self.device_ip, "/sys/version")
    }
}

fn validate_device(device_id: DeviceId, device_ip: u32) -> Result<()> {
    if device_id.is_wildcard() && device_ip == 0 {
        return Err(HdhrError::invalid_argument(
            "a device id or an ip address is required",
        ));
    }
    Ok(())
}

fn validate_tuner(tuner: u32, tuner_count: u32) -> Result<()> {
    if tuner >= tuner_count {
        return Err(HdhrError::invalid_argument(format!(
            "tuner {tuner} out of range, device has {tuner_count}"
        )));
    }
    Ok(())
}

fn not_found(what: &str) -> HdhrError {
    warn!("device {what} did not answer discovery");
    HdhrError::communication(io::Error::new(
        io::ErrorKind::NotFound,
        format!("device {what} not found"),
    ))
}
