//! Core HDHomeRun protocol types and constants.

/// UDP port for discovery and TCP port for control.
pub const CONTROL_PORT: u16 = 65001;

/// Largest packet the device will send or accept, including framing.
pub const MAX_PACKET_SIZE: usize = 1460;

/// Size of one MPEG transport stream packet.
pub const TS_PACKET_SIZE: usize = 188;

/// Size of one video datagram emitted by the device (7 TS packets).
pub const VIDEO_DATA_PACKET_SIZE: usize = TS_PACKET_SIZE * 7;

/// Buffer size holding one second of video at 20 Mbit/s.
pub const VIDEO_DATA_BUFFER_SIZE_1S: usize = 20_000_000 / 8;

/// Value written to a tuner lockkey variable to clear a lock held by anyone.
pub const LOCKKEY_FORCE: &str = "force";

/// Value written to a tuner lockkey variable to release our own lock.
pub const LOCKKEY_NONE: &str = "none";

/// Value written to a tuner target variable to stop streaming.
pub const TARGET_NONE: &str = "none";

/// Packet types as carried in the 16-bit type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketType {
    /// Discovery probe.
    DiscoverRequest = 0x0002,
    /// Discovery reply.
    DiscoverReply = 0x0003,
    /// Named variable get or set.
    GetSetRequest = 0x0004,
    /// Reply to a get or set.
    GetSetReply = 0x0005,
    /// Firmware chunk or end marker.
    UpgradeRequest = 0x0006,
    /// Reply to the firmware end marker.
    UpgradeReply = 0x0007,
}

impl PacketType {
    /// Create a PacketType from a raw value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0002 => Some(Self::DiscoverRequest),
            0x0003 => Some(Self::DiscoverReply),
            0x0004 => Some(Self::GetSetRequest),
            0x0005 => Some(Self::GetSetReply),
            0x0006 => Some(Self::UpgradeRequest),
            0x0007 => Some(Self::UpgradeReply),
            _ => None,
        }
    }
}

/// TLV tags understood by this client.
///
/// Unknown tags are kept as raw bytes and ignored.
pub mod tag {
    /// Device type (u32).
    pub const DEVICE_TYPE: u8 = 0x01;
    /// Device ID (u32).
    pub const DEVICE_ID: u8 = 0x02;
    /// Variable name (NUL terminated).
    pub const GETSET_NAME: u8 = 0x03;
    /// Variable value (NUL terminated).
    pub const GETSET_VALUE: u8 = 0x04;
    /// Error message from the device (NUL terminated).
    pub const ERROR_MESSAGE: u8 = 0x05;
    /// Number of tuners (u8).
    pub const TUNER_COUNT: u8 = 0x10;
    /// Lock key accompanying a set (u32).
    pub const GETSET_LOCKKEY: u8 = 0x15;
}

/// Device types advertised during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Matches any device type.
    Wildcard,
    /// A tuner appliance.
    Tuner,
    /// Any other advertised type.
    Other(u32),
}

impl DeviceType {
    /// Create a DeviceType from its wire value.
    pub fn from_u32(value: u32) -> Self {
        match value {
            0xFFFF_FFFF => Self::Wildcard,
            0x0000_0001 => Self::Tuner,
            other => Self::Other(other),
        }
    }

    /// The wire value.
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Wildcard => 0xFFFF_FFFF,
            Self::Tuner => 0x0000_0001,
            Self::Other(v) => *v,
        }
    }
}
