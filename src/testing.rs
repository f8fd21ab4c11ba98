//! In-memory transport simulating one network of devices.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Cursor, Read};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{DiscoveryConfig, SessionConfig};
use crate::device::DeviceId;
use crate::exchange::{GetSetRequest, Reply};
use crate::transport::{ControlChannel, DiscoverReply, Transport, VideoBind, VideoSocket};
use crate::types::{DeviceType, LOCKKEY_FORCE, LOCKKEY_NONE};

pub const UNKNOWN_VARIABLE: &str = "ERROR: unknown getset variable";
pub const RESOURCE_LOCKED: &str = "ERROR: resource locked";

struct State {
    vars: HashMap<String, String>,
    unrecognized: HashSet<String>,
    devices: Vec<DiscoverReply>,
    offline: bool,
    connects: usize,
    discovers: usize,
    requests: Vec<GetSetRequest>,
    locks: HashMap<String, u32>,
    upgrade_reply: Reply<()>,
    uploaded: Option<Vec<u8>>,
    reboot_polls: u32,
    rebooting: bool,
    video: VecDeque<Vec<u8>>,
    video_binds: Vec<VideoBind>,
    video_port: u16,
    images: HashMap<PathBuf, Vec<u8>>,
    local_ip: Ipv4Addr,
}

impl State {
    fn unreachable(&mut self) -> Option<io::Error> {
        if self.offline {
            return Some(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        if self.rebooting {
            if self.reboot_polls == 0 {
                self.rebooting = false;
                return None;
            }
            self.reboot_polls -= 1;
            return Some(io::Error::from(io::ErrorKind::ConnectionReset));
        }
        None
    }

    fn get_set(&mut self, request: &GetSetRequest) -> Reply<String> {
        if self.unrecognized.contains(&request.name) {
            return Reply::Unrecognized;
        }

        let tuner = tuner_prefix(&request.name).map(str::to_string);
        let held = tuner.as_ref().and_then(|t| self.locks.get(t).copied());

        if let (Some(tuner), Some(value)) = (&tuner, &request.value) {
            if request.name.ends_with("/lockkey") {
                return self.set_lockkey(tuner, value, request.lockkey);
            }
            if held.is_some() && held != request.lockkey {
                return Reply::Rejected(Some(RESOURCE_LOCKED.to_string()));
            }
        }

        if let (Some(tuner), None) = (&tuner, &request.value) {
            if request.name.ends_with("/lockkey") {
                let owner = match self.locks.get(tuner) {
                    Some(_) => self.local_ip.to_string(),
                    None => LOCKKEY_NONE.to_string(),
                };
                return Reply::Accepted(owner);
            }
        }

        match &request.value {
            Some(value) => {
                self.vars.insert(request.name.clone(), value.clone());
                Reply::Accepted(value.clone())
            }
            None => match self.vars.get(&request.name) {
                Some(value) => Reply::Accepted(value.clone()),
                None => Reply::Rejected(Some(UNKNOWN_VARIABLE.to_string())),
            },
        }
    }

    fn set_lockkey(&mut self, tuner: &str, value: &str, lockkey: Option<u32>) -> Reply<String> {
        let held = self.locks.get(tuner).copied();
        if value == LOCKKEY_FORCE {
            self.locks.remove(tuner);
            return Reply::Accepted(LOCKKEY_NONE.to_string());
        }
        if held.is_some() && held != lockkey {
            return Reply::Rejected(Some(RESOURCE_LOCKED.to_string()));
        }
        if value == LOCKKEY_NONE {
            self.locks.remove(tuner);
            return Reply::Accepted(LOCKKEY_NONE.to_string());
        }
        match value.parse::<u32>() {
            Ok(key) if key != 0 => {
                self.locks.insert(tuner.to_string(), key);
                Reply::Accepted(value.to_string())
            }
            _ => Reply::Rejected(Some("ERROR: invalid lockkey".to_string())),
        }
    }
}

fn tuner_prefix(name: &str) -> Option<&str> {
    let rest = name.strip_prefix("/tuner")?;
    let end = rest.find('/')?;
    Some(&name[..6 + end])
}

/// Fake transport with shared, inspectable state.
#[derive(Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<State>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                vars: HashMap::new(),
                unrecognized: HashSet::new(),
                devices: Vec::new(),
                offline: false,
                connects: 0,
                discovers: 0,
                requests: Vec::new(),
                locks: HashMap::new(),
                upgrade_reply: Reply::Accepted(()),
                uploaded: None,
                reboot_polls: 0,
                rebooting: false,
                video: VecDeque::new(),
                video_binds: Vec::new(),
                video_port: 5004,
                images: HashMap::new(),
                local_ip: Ipv4Addr::new(192, 168, 1, 50),
            })),
        }
    }

    pub fn set_var(&self, name: &str, value: &str) {
        self.state.lock().vars.insert(name.to_string(), value.to_string());
    }

    pub fn var(&self, name: &str) -> Option<String> {
        self.state.lock().vars.get(name).cloned()
    }

    pub fn set_unrecognized(&self, name: &str) {
        self.state.lock().unrecognized.insert(name.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn add_device(&self, device_id: u32, ip: Ipv4Addr, tuner_count: u8) {
        self.state.lock().devices.push(DiscoverReply {
            device_type: DeviceType::Tuner,
            device_id: DeviceId(device_id),
            ip,
            tuner_count,
        });
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn discover_count(&self) -> usize {
        self.state.lock().discovers
    }

    pub fn requests(&self) -> Vec<GetSetRequest> {
        self.state.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Lock key the simulated device holds for `tuner`.
    pub fn lock_holder(&self, tuner: u32) -> Option<u32> {
        self.state.lock().locks.get(&format!("/tuner{tuner}")).copied()
    }

    /// Simulate another client holding the lock.
    pub fn set_lock_holder(&self, tuner: u32, lockkey: u32) {
        self.state.lock().locks.insert(format!("/tuner{tuner}"), lockkey);
    }

    pub fn set_upgrade_reply(&self, reply: Reply<()>) {
        self.state.lock().upgrade_reply = reply;
    }

    pub fn uploaded(&self) -> Option<Vec<u8>> {
        self.state.lock().uploaded.clone()
    }

    /// Number of operations that fail after an accepted upload.
    pub fn set_reboot_polls(&self, polls: u32) {
        self.state.lock().reboot_polls = polls;
    }

    pub fn add_image(&self, path: &str, data: &[u8]) {
        self.state.lock().images.insert(PathBuf::from(path), data.to_vec());
    }

    pub fn push_video(&self, datagram: Vec<u8>) {
        self.state.lock().video.push_back(datagram);
    }

    pub fn video_binds(&self) -> Vec<VideoBind> {
        self.state.lock().video_binds.clone()
    }

    pub fn local_ip(&self) -> Ipv4Addr {
        self.state.lock().local_ip
    }

    pub fn video_port(&self) -> u16 {
        self.state.lock().video_port
    }
}

impl Transport for FakeTransport {
    fn discover(
        &self,
        target: Option<Ipv4Addr>,
        device_id: DeviceId,
        _config: &DiscoveryConfig,
    ) -> io::Result<Vec<DiscoverReply>> {
        let mut state = self.state.lock();
        if state.offline {
            return Err(io::Error::from(io::ErrorKind::NetworkUnreachable));
        }
        state.discovers += 1;
        Ok(state
            .devices
            .iter()
            .filter(|d| target.is_none_or(|ip| d.ip == ip))
            .filter(|d| device_id.is_wildcard() || d.device_id == device_id)
            .cloned()
            .collect())
    }

    fn connect(&self, _device_ip: Ipv4Addr, _config: &SessionConfig) -> io::Result<Box<dyn ControlChannel>> {
        let mut state = self.state.lock();
        if let Some(e) = state.unreachable() {
            return Err(e);
        }
        state.connects += 1;
        Ok(Box::new(FakeChannel {
            state: Arc::clone(&self.state),
        }))
    }

    fn open_video(&self, bind: VideoBind, _config: &SessionConfig) -> io::Result<Box<dyn VideoSocket>> {
        let mut state = self.state.lock();
        state.video_binds.push(bind);
        let port = match bind {
            VideoBind::Unicast => state.video_port,
            VideoBind::Multicast { port, .. } => port,
        };
        Ok(Box::new(FakeVideo {
            state: Arc::clone(&self.state),
            port,
        }))
    }

    fn open_image(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        match self.state.lock().images.get(path) {
            Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }
}

struct FakeChannel {
    state: Arc<Mutex<State>>,
}

impl ControlChannel for FakeChannel {
    fn get_set(&mut self, request: &GetSetRequest) -> io::Result<Reply<String>> {
        let mut state = self.state.lock();
        if let Some(e) = state.unreachable() {
            return Err(e);
        }
        state.requests.push(request.clone());
        Ok(state.get_set(request))
    }

    fn upgrade(&mut self, image: &[u8]) -> io::Result<Reply<()>> {
        let mut state = self.state.lock();
        if let Some(e) = state.unreachable() {
            return Err(e);
        }
        let reply = state.upgrade_reply.clone();
        if reply == Reply::Accepted(()) {
            state.uploaded = Some(image.to_vec());
            state.rebooting = true;
        }
        Ok(reply)
    }

    fn local_ip(&self) -> io::Result<Ipv4Addr> {
        Ok(self.state.lock().local_ip)
    }
}

struct FakeVideo {
    state: Arc<Mutex<State>>,
    port: u16,
}

impl VideoSocket for FakeVideo {
    fn local_port(&self) -> io::Result<u16> {
        Ok(self.port)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let next = self.state.lock().video.pop_front();
        match next {
            Some(data) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            None => {
                thread::sleep(Duration::from_millis(1));
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
        }
    }
}
