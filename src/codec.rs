//! Packet framing on byte streams.

use std::io::{self, Read, Write};

use crate::packet::{invalid_data, Packet, HEADER_SIZE};
use crate::types::MAX_PACKET_SIZE;

/// Read one complete packet from a stream.
///
/// Reads the header first, then the payload and CRC based on the length field.
pub fn read_packet<R: Read>(reader: &mut R) -> io::Result<Packet> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let total = Packet::frame_length(&header).unwrap_or(HEADER_SIZE);
    if total > MAX_PACKET_SIZE {
        return Err(invalid_data(format!(
            "frame of {total} bytes exceeds maximum of {MAX_PACKET_SIZE}"
        )));
    }

    let mut frame = vec![0u8; total];
    frame[..HEADER_SIZE].copy_from_slice(&header);
    reader.read_exact(&mut frame[HEADER_SIZE..])?;

    Packet::from_bytes(&frame)
}

/// Write one complete packet to a stream.
pub fn write_packet<W: Write>(writer: &mut W, packet: &Packet) -> io::Result<()> {
    writer.write_all(&packet.to_bytes())?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{tag, PacketType};

    fn reply(value: &str) -> Packet {
        Packet::builder(PacketType::GetSetReply)
            .string(tag::GETSET_NAME, "/tuner0/channel")
            .string(tag::GETSET_VALUE, value)
            .build()
            .unwrap()
    }

    #[test]
    fn test_read_write_packet() {
        let original = reply("auto:183000000");

        let mut buffer = Vec::new();
        write_packet(&mut buffer, &original).unwrap();

        let mut cursor = io::Cursor::new(buffer);
        let parsed = read_packet(&mut cursor).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_read_truncated_stream() {
        let bytes = reply("none").to_bytes();
        let mut cursor = io::Cursor::new(bytes[..bytes.len() - 2].to_vec());
        let err = read_packet(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
