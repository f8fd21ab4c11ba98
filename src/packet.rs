//! HDHomeRun packet framing.
//!
//! ```text
//! +--------+--------+--------+--------+
//! |  Packet type    |  Payload length |  (4 bytes, big endian)
//! +--------+--------+--------+--------+
//! |           Payload ...             |  (TLVs, or raw for upgrade chunks)
//! +--------+--------+--------+--------+
//! |        CRC-32 (little endian)     |  (4 bytes, over header + payload)
//! +--------+--------+--------+--------+
//! ```
//!
//! A TLV is a one byte tag, a one or two byte length and the value.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::types::{PacketType, MAX_PACKET_SIZE};

/// Size of the type + length header.
pub const HEADER_SIZE: usize = 4;

/// Size of the CRC trailer.
pub const CRC_SIZE: usize = 4;

static CRC_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// IEEE CRC-32 (reflected, as used by Ethernet).
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let index = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC_TABLE[index];
    }
    crc ^ 0xFFFF_FFFF
}

pub(crate) fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// A single tag-length-value field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    /// Tag byte.
    pub tag: u8,
    /// Raw value.
    pub value: Bytes,
}

/// The TLVs of a packet in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlvs(Vec<Tlv>);

impl Tlvs {
    /// First value carrying `tag`.
    pub fn get(&self, tag: u8) -> Option<&Bytes> {
        self.0.iter().find(|t| t.tag == tag).map(|t| &t.value)
    }

    /// First value carrying `tag`, as a big endian u32.
    pub fn get_u32(&self, tag: u8) -> Option<u32> {
        let value = self.get(tag)?;
        let bytes: [u8; 4] = value.as_ref().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    /// First value carrying `tag`, as a u8.
    pub fn get_u8(&self, tag: u8) -> Option<u8> {
        match self.get(tag)?.as_ref() {
            [v] => Some(*v),
            _ => None,
        }
    }

    /// First value carrying `tag`, as a string with the NUL terminator removed.
    pub fn get_string(&self, tag: u8) -> Option<String> {
        let value = self.get(tag)?;
        let end = value.iter().position(|&b| b == 0).unwrap_or(value.len());
        Some(String::from_utf8_lossy(&value[..end]).into_owned())
    }

    /// Iterate over all fields.
    pub fn iter(&self) -> impl Iterator<Item = &Tlv> {
        self.0.iter()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A complete packet (type + payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet type.
    pub packet_type: PacketType,
    /// Payload without header or CRC.
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet with a raw payload.
    pub fn new(packet_type: PacketType, payload: impl Into<Bytes>) -> Self {
        Self {
            packet_type,
            payload: payload.into(),
        }
    }

    /// Create a TLV packet builder.
    pub fn builder(packet_type: PacketType) -> PacketBuilder {
        PacketBuilder::new(packet_type)
    }

    /// Parse the payload as TLVs.
    pub fn tlvs(&self) -> io::Result<Tlvs> {
        let mut buf = self.payload.clone();
        let mut fields = Vec::new();

        while buf.has_remaining() {
            let tag = buf.get_u8();
            let len = read_var_len(&mut buf)?;
            if buf.remaining() < len {
                return Err(invalid_data(format!(
                    "tag 0x{tag:02X} claims {len} bytes, {} remain",
                    buf.remaining()
                )));
            }
            fields.push(Tlv {
                tag,
                value: buf.split_to(len),
            });
        }

        Ok(Tlvs(fields))
    }

    /// Serialize to header + payload + CRC.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len() + CRC_SIZE);
        buf.put_u16(self.packet_type as u16);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
        let crc = crc32(&buf);
        buf.put_u32_le(crc);
        buf.to_vec()
    }

    /// Total frame size announced by a header, including CRC.
    pub fn frame_length(header: &[u8]) -> Option<usize> {
        if header.len() < HEADER_SIZE {
            return None;
        }
        let payload_len = u16::from_be_bytes([header[2], header[3]]) as usize;
        Some(HEADER_SIZE + payload_len + CRC_SIZE)
    }

    /// Parse one complete frame.
    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        let total = Self::frame_length(data)
            .ok_or_else(|| invalid_data(format!("packet too short: {} bytes", data.len())))?;
        if data.len() != total {
            return Err(invalid_data(format!(
                "packet length mismatch: header says {total} bytes, got {}",
                data.len()
            )));
        }

        let (body, trailer) = data.split_at(total - CRC_SIZE);
        let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let actual = crc32(body);
        if expected != actual {
            return Err(invalid_data(format!(
                "crc mismatch: expected 0x{expected:08X}, computed 0x{actual:08X}"
            )));
        }

        let raw_type = u16::from_be_bytes([body[0], body[1]]);
        let packet_type = PacketType::from_u16(raw_type)
            .ok_or_else(|| invalid_data(format!("unknown packet type 0x{raw_type:04X}")))?;

        Ok(Self {
            packet_type,
            payload: Bytes::copy_from_slice(&body[HEADER_SIZE..]),
        })
    }
}

fn write_var_len(buf: &mut BytesMut, len: usize) {
    if len <= 0x7F {
        buf.put_u8(len as u8);
    } else {
        buf.put_u8((len as u8 & 0x7F) | 0x80);
        buf.put_u8((len >> 7) as u8);
    }
}

fn read_var_len(buf: &mut Bytes) -> io::Result<usize> {
    if !buf.has_remaining() {
        return Err(invalid_data("truncated tlv length"));
    }
    let first = buf.get_u8() as usize;
    if first & 0x80 == 0 {
        return Ok(first);
    }
    if !buf.has_remaining() {
        return Err(invalid_data("truncated tlv length"));
    }
    let second = buf.get_u8() as usize;
    Ok((first & 0x7F) | (second << 7))
}

/// Builder for TLV packets.
#[derive(Debug)]
pub struct PacketBuilder {
    packet_type: PacketType,
    payload: BytesMut,
}

impl PacketBuilder {
    /// Create a new builder.
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            packet_type,
            payload: BytesMut::with_capacity(64),
        }
    }

    /// Append a raw field.
    pub fn field(mut self, tag: u8, value: &[u8]) -> Self {
        self.payload.put_u8(tag);
        write_var_len(&mut self.payload, value.len());
        self.payload.put_slice(value);
        self
    }

    /// Append a u8 field.
    pub fn u8(self, tag: u8, value: u8) -> Self {
        self.field(tag, &[value])
    }

    /// Append a big endian u32 field.
    pub fn u32(self, tag: u8, value: u32) -> Self {
        self.field(tag, &value.to_be_bytes())
    }

    /// Append a NUL terminated string field.
    pub fn string(self, tag: u8, value: &str) -> Self {
        let mut raw = Vec::with_capacity(value.len() + 1);
        raw.extend_from_slice(value.as_bytes());
        raw.push(0);
        self.field(tag, &raw)
    }

    /// Build the packet.
    ///
    /// Fails if the frame would exceed [`MAX_PACKET_SIZE`].
    pub fn build(self) -> io::Result<Packet> {
        let total = HEADER_SIZE + self.payload.len() + CRC_SIZE;
        if total > MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("packet of {total} bytes exceeds maximum of {MAX_PACKET_SIZE}"),
            ));
        }
        Ok(Packet {
            packet_type: self.packet_type,
            payload: self.payload.freeze(),
        })
    }
}
