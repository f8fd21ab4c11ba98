//! Device identity and addressing.

use std::net::Ipv4Addr;

use crate::error::{HdhrError, Result};

/// Device ID - the 32-bit identifier printed on every appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Matches any device during discovery.
    pub const WILDCARD: DeviceId = DeviceId(0xFFFF_FFFF);

    /// Check if this ID is the wildcard or the unset value.
    pub fn is_wildcard(&self) -> bool {
        self.0 == 0 || *self == Self::WILDCARD
    }

    /// Tuner count implied by the ID family when the device does not report one.
    pub fn inferred_tuner_count(&self) -> Option<u8> {
        match self.0 >> 20 {
            0x102 => Some(1),
            0x100 | 0x101 | 0x121 => Some(2),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

/// Parse a dotted-quad IPv4 address into its 32-bit host-order value.
///
/// Exactly four dot-separated decimal octets in 0..=255 are accepted.
/// Nothing is resolved and no network traffic is generated.
pub fn parse_ip_addr(s: &str) -> Result<u32> {
    let invalid = || HdhrError::invalid_argument(format!("invalid ip address: {s:?}"));

    let mut octets = [0u8; 4];
    let mut parts = s.split('.');
    for octet in octets.iter_mut() {
        let part = parts.next().ok_or_else(invalid)?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        *octet = part.parse().map_err(|_| invalid())?;
    }
    if parts.next().is_some() {
        return Err(invalid());
    }

    Ok(u32::from_be_bytes(octets))
}

/// Format a 32-bit address as a dotted quad.
pub fn format_ip_addr(ip: u32) -> String {
    Ipv4Addr::from(ip).to_string()
}

/// A device found by discovery or supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    /// Device ID.
    pub device_id: DeviceId,
    /// IPv4 address, most significant octet first.
    pub device_ip: u32,
    /// Number of tuners on the device.
    pub tuner_count: u32,
}

impl DeviceDescriptor {
    /// Create a new descriptor.
    pub fn new(device_id: u32, device_ip: u32, tuner_count: u32) -> Self {
        Self {
            device_id: DeviceId(device_id),
            device_ip,
            tuner_count,
        }
    }

    /// The device address as an `Ipv4Addr`.
    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.device_ip)
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {} ({} tuners)",
            self.device_id,
            self.ip(),
            self.tuner_count
        )
    }
}
