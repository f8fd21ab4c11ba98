//! UDP discovery and video sockets.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::config::DiscoveryConfig;
use crate::device::DeviceId;
use crate::packet::Packet;
use crate::transport::{DiscoverReply, VideoBind, VideoSocket};
use crate::types::{tag, DeviceType, PacketType, MAX_PACKET_SIZE};

/// Socket used to probe for devices.
#[derive(Debug)]
pub struct DiscoverySocket {
    socket: UdpSocket,
    recv_buffer: Vec<u8>,
}

impl DiscoverySocket {
    /// Bind an ephemeral broadcast-capable socket.
    pub fn new() -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket,
            recv_buffer: vec![0u8; MAX_PACKET_SIZE],
        })
    }

    /// Get the local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Probe for devices and collect distinct replies.
    ///
    /// `target` of `None` broadcasts on the local segment. Replies are
    /// deduplicated by device ID; at most `config.max_replies` are kept.
    pub fn find_devices(
        &mut self,
        target: Option<Ipv4Addr>,
        device_type: DeviceType,
        device_id: DeviceId,
        config: &DiscoveryConfig,
    ) -> io::Result<Vec<DiscoverReply>> {
        let dest = SocketAddr::new(
            IpAddr::V4(target.unwrap_or(Ipv4Addr::BROADCAST)),
            config.port,
        );
        let probe = Packet::builder(PacketType::DiscoverRequest)
            .u32(tag::DEVICE_TYPE, device_type.as_u32())
            .u32(tag::DEVICE_ID, device_id.0)
            .build()?;
        let probe = probe.to_bytes();

        let mut replies: Vec<DiscoverReply> = Vec::new();
        for attempt in 0..config.attempts.max(1) {
            trace!("discovery probe {} to {dest}", attempt + 1);
            self.socket.send_to(&probe, dest)?;
            self.collect(device_type, device_id, config, &mut replies)?;

            let found_target = (target.is_some() || !device_id.is_wildcard()) && !replies.is_empty();
            if found_target || replies.len() >= config.max_replies {
                break;
            }
        }

        debug!("discovery found {} device(s)", replies.len());
        Ok(replies)
    }

    fn collect(
        &mut self,
        device_type: DeviceType,
        device_id: DeviceId,
        config: &DiscoveryConfig,
        replies: &mut Vec<DiscoverReply>,
    ) -> io::Result<()> {
        let deadline = Instant::now() + config.window;

        while replies.len() < config.max_replies {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.socket.set_read_timeout(Some(remaining))?;

            let (len, from) = match self.socket.recv_from(&mut self.recv_buffer) {
                Ok(received) => received,
                Err(e) if is_timeout(&e) => break,
                Err(e) => return Err(e),
            };

            let Some(reply) = parse_reply(&self.recv_buffer[..len], from) else {
                trace!("ignoring malformed discovery reply from {from}");
                continue;
            };
            if device_type != DeviceType::Wildcard && reply.device_type != device_type {
                continue;
            }
            if !device_id.is_wildcard() && reply.device_id != device_id {
                continue;
            }
            if replies.iter().any(|r| r.device_id == reply.device_id) {
                continue;
            }
            replies.push(reply);
        }

        Ok(())
    }
}

fn parse_reply(data: &[u8], from: SocketAddr) -> Option<DiscoverReply> {
    let IpAddr::V4(ip) = from.ip() else {
        return None;
    };
    let packet = Packet::from_bytes(data).ok()?;
    if packet.packet_type != PacketType::DiscoverReply {
        return None;
    }
    let tlvs = packet.tlvs().ok()?;
    let device_type = DeviceType::from_u32(tlvs.get_u32(tag::DEVICE_TYPE)?);
    let device_id = DeviceId(tlvs.get_u32(tag::DEVICE_ID)?);
    let tuner_count = tlvs
        .get_u8(tag::TUNER_COUNT)
        .or_else(|| device_id.inferred_tuner_count())
        .unwrap_or(0);

    Some(DiscoverReply {
        device_type,
        device_id,
        ip,
        tuner_count,
    })
}

pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Socket receiving video datagrams.
#[derive(Debug)]
pub struct UdpVideoSocket {
    socket: UdpSocket,
    multicast_group: Option<Ipv4Addr>,
}

impl UdpVideoSocket {
    /// Bind according to `bind`, blocking at most `poll_timeout` per receive.
    pub fn bind(bind: VideoBind, poll_timeout: Duration) -> io::Result<Self> {
        let (socket, multicast_group) = match bind {
            VideoBind::Unicast => (UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?, None),
            VideoBind::Multicast { group, port } => {
                let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
                socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
                debug!("joined multicast group {group}:{port}");
                (socket, Some(group))
            }
        };
        socket.set_read_timeout(Some(poll_timeout.max(Duration::from_millis(1))))?;
        Ok(Self {
            socket,
            multicast_group,
        })
    }

    /// Get the local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl VideoSocket for UdpVideoSocket {
    fn local_port(&self) -> io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }
}

impl Drop for UdpVideoSocket {
    fn drop(&mut self) {
        if let Some(group) = self.multicast_group {
            let _ = self.socket.leave_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED);
        }
    }
}
