//! Transport layer for HDHomeRun devices.
//!
//! The session logic only talks to the traits in this module. [`NetTransport`]
//! is the default implementation: TCP for control, UDP for discovery and video.

use std::fs::File;
use std::io::{self, Read};
use std::net::Ipv4Addr;
use std::path::Path;

use crate::config::{DiscoveryConfig, SessionConfig};
use crate::device::DeviceId;
use crate::exchange::{GetSetRequest, Reply};
use crate::types::DeviceType;

pub mod tcp;
pub mod udp;

pub use tcp::TcpControlChannel;
pub use udp::{DiscoverySocket, UdpVideoSocket};

/// One answer to a discovery probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverReply {
    /// Advertised device type.
    pub device_type: DeviceType,
    /// Device ID.
    pub device_id: DeviceId,
    /// Source address of the reply.
    pub ip: Ipv4Addr,
    /// Number of tuners, zero if unknown.
    pub tuner_count: u8,
}

/// Where the video socket should receive from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoBind {
    /// An ephemeral local port; the device is told to send there.
    Unicast,
    /// A multicast group the device already sends to.
    Multicast {
        /// Group address.
        group: Ipv4Addr,
        /// Group port.
        port: u16,
    },
}

/// A control connection to one device.
pub trait ControlChannel: Send {
    /// One get or set round trip.
    fn get_set(&mut self, request: &GetSetRequest) -> io::Result<Reply<String>>;

    /// Upload a firmware image and wait for the device's verdict.
    fn upgrade(&mut self, image: &[u8]) -> io::Result<Reply<()>>;

    /// Local address the device sees this client at.
    fn local_ip(&self) -> io::Result<Ipv4Addr>;
}

/// A socket receiving the device's video datagrams.
pub trait VideoSocket: Send {
    /// Bound local port.
    fn local_port(&self) -> io::Result<u16>;

    /// Receive one datagram.
    ///
    /// `WouldBlock` and `TimedOut` mean no data arrived within the poll timeout.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Everything the session layer needs from the network and filesystem.
pub trait Transport: Send + Sync {
    /// Probe for devices and collect replies.
    ///
    /// `target` of `None` broadcasts. Zero replies is `Ok(vec![])`.
    fn discover(
        &self,
        target: Option<Ipv4Addr>,
        device_id: DeviceId,
        config: &DiscoveryConfig,
    ) -> io::Result<Vec<DiscoverReply>>;

    /// Open a control connection.
    fn connect(&self, device_ip: Ipv4Addr, config: &SessionConfig)
    -> io::Result<Box<dyn ControlChannel>>;

    /// Open a video socket.
    fn open_video(&self, bind: VideoBind, config: &SessionConfig) -> io::Result<Box<dyn VideoSocket>>;

    /// Open a firmware image.
    fn open_image(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }
}

/// The default transport using `std::net`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetTransport;

impl NetTransport {
    /// Create the default transport.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for NetTransport {
    fn discover(
        &self,
        target: Option<Ipv4Addr>,
        device_id: DeviceId,
        config: &DiscoveryConfig,
    ) -> io::Result<Vec<DiscoverReply>> {
        let mut socket = DiscoverySocket::new()?;
        socket.find_devices(target, DeviceType::Tuner, device_id, config)
    }

    fn connect(
        &self,
        device_ip: Ipv4Addr,
        config: &SessionConfig,
    ) -> io::Result<Box<dyn ControlChannel>> {
        let channel = TcpControlChannel::connect(device_ip, config)?;
        Ok(Box::new(channel))
    }

    fn open_video(&self, bind: VideoBind, config: &SessionConfig) -> io::Result<Box<dyn VideoSocket>> {
        let socket = UdpVideoSocket::bind(bind, config.video_poll_timeout)?;
        Ok(Box::new(socket))
    }
}
