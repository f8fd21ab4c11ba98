//! TCP control connection.

use std::io::{self, BufReader, BufWriter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use log::trace;

use crate::codec::{read_packet, write_packet};
use crate::config::SessionConfig;
use crate::exchange::{GetSetRequest, Reply};
use crate::packet::{invalid_data, Packet};
use crate::transport::ControlChannel;
use crate::types::{tag, PacketType};

/// Offset value marking the end of a firmware upload.
pub const UPGRADE_END_MARKER: u32 = 0xFFFF_FFFF;

/// Shortest timeout applied to the socket; zero is rejected by the OS.
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// A control connection to a device's TCP port.
#[derive(Debug)]
pub struct TcpControlChannel {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    peer_addr: SocketAddr,
    reply_timeout: Duration,
    upgrade_reply_timeout: Duration,
    chunk_size: usize,
}

impl TcpControlChannel {
    /// Connect to a device.
    pub fn connect(device_ip: Ipv4Addr, config: &SessionConfig) -> io::Result<Self> {
        let addr = SocketAddr::new(IpAddr::V4(device_ip), config.control_port);
        let reply_timeout = config.reply_timeout.max(MIN_TIMEOUT);
        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout.max(MIN_TIMEOUT))?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(reply_timeout))?;

        let peer_addr = stream.peer_addr()?;
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);
        Ok(Self {
            reader,
            writer,
            peer_addr,
            reply_timeout,
            upgrade_reply_timeout: config.upgrade_reply_timeout.max(MIN_TIMEOUT),
            chunk_size: config.upgrade_chunk_size.max(1),
        })
    }

    /// Get the peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn send(&mut self, packet: &Packet) -> io::Result<()> {
        write_packet(&mut self.writer, packet)
    }

    fn receive(&mut self, expected: PacketType, timeout: Duration) -> io::Result<Packet> {
        self.writer.get_ref().set_read_timeout(Some(timeout))?;
        let packet = read_packet(&mut self.reader)?;
        if packet.packet_type != expected {
            return Err(invalid_data(format!(
                "expected {expected:?}, received {:?}",
                packet.packet_type
            )));
        }
        Ok(packet)
    }
}

impl ControlChannel for TcpControlChannel {
    fn get_set(&mut self, request: &GetSetRequest) -> io::Result<Reply<String>> {
        let mut builder = Packet::builder(PacketType::GetSetRequest).string(tag::GETSET_NAME, &request.name);
        if let Some(value) = &request.value {
            builder = builder.string(tag::GETSET_VALUE, value);
        }
        if let Some(lockkey) = request.lockkey {
            builder = builder.u32(tag::GETSET_LOCKKEY, lockkey);
        }

        self.send(&builder.build()?)?;
        let reply = self.receive(PacketType::GetSetReply, self.reply_timeout)?;
        let tlvs = reply.tlvs()?;

        if let Some(message) = tlvs.get_string(tag::ERROR_MESSAGE) {
            return Ok(Reply::Rejected(Some(message).filter(|m| !m.is_empty())));
        }
        Ok(match tlvs.get_string(tag::GETSET_VALUE) {
            Some(value) => Reply::Accepted(value),
            None => Reply::Unrecognized,
        })
    }

    fn upgrade(&mut self, image: &[u8]) -> io::Result<Reply<()>> {
        for (index, chunk) in image.chunks(self.chunk_size).enumerate() {
            let offset = (index * self.chunk_size) as u32;
            let mut payload = BytesMut::with_capacity(4 + chunk.len());
            payload.put_u32(offset);
            payload.put_slice(chunk);
            self.send(&Packet::new(PacketType::UpgradeRequest, payload.freeze()))?;
        }
        trace!("{}: sent {} byte image, awaiting verdict", self.peer_addr, image.len());

        let end = UPGRADE_END_MARKER.to_be_bytes();
        self.send(&Packet::new(PacketType::UpgradeRequest, end.to_vec()))?;
        let reply = self.receive(PacketType::UpgradeReply, self.upgrade_reply_timeout)?;

        match reply.tlvs()?.get_string(tag::ERROR_MESSAGE) {
            Some(message) => Ok(Reply::Rejected(Some(message).filter(|m| !m.is_empty()))),
            None => Ok(Reply::Accepted(())),
        }
    }

    fn local_ip(&self) -> io::Result<Ipv4Addr> {
        match self.writer.get_ref().local_addr()?.ip() {
            IpAddr::V4(ip) => Ok(ip),
            IpAddr::V6(ip) => ip.to_ipv4_mapped().ok_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "control connection is not IPv4")
            }),
        }
    }
}
