//! Device discovery.

use std::net::Ipv4Addr;

use log::debug;

use crate::config::DiscoveryConfig;
use crate::device::{parse_ip_addr, DeviceDescriptor, DeviceId};
use crate::error::{HdhrError, Result};
use crate::transport::{DiscoverReply, Transport};

/// Find tuner devices.
///
/// `target` must be a dotted quad; it is validated before any network
/// activity. `None` broadcasts. Zero replies is a successful empty result.
pub fn discover(
    transport: &dyn Transport,
    target: Option<&str>,
    config: &DiscoveryConfig,
) -> Result<Vec<DeviceDescriptor>> {
    let target = target.map(parse_ip_addr).transpose()?.map(Ipv4Addr::from);
    let replies = probe(transport, target, DeviceId::WILDCARD, config)?;
    Ok(replies.iter().map(descriptor).collect())
}

/// Probe for one device, by address or by ID.
pub(crate) fn find_device(
    transport: &dyn Transport,
    target: Option<Ipv4Addr>,
    device_id: DeviceId,
    config: &DiscoveryConfig,
) -> Result<Option<DeviceDescriptor>> {
    let replies = probe(transport, target, device_id, config)?;
    Ok(replies.first().map(descriptor))
}

fn probe(
    transport: &dyn Transport,
    target: Option<Ipv4Addr>,
    device_id: DeviceId,
    config: &DiscoveryConfig,
) -> Result<Vec<DiscoverReply>> {
    let mut replies = transport
        .discover(target, device_id, config)
        .map_err(HdhrError::communication)?;

    if replies.len() > config.max_replies {
        debug!("truncating {} discovery replies to {}", replies.len(), config.max_replies);
        replies.truncate(config.max_replies);
    }
    Ok(replies)
}

fn descriptor(reply: &DiscoverReply) -> DeviceDescriptor {
    let tuner_count = match reply.tuner_count {
        0 => reply.device_id.inferred_tuner_count().unwrap_or(0),
        n => n,
    };
    DeviceDescriptor::new(reply.device_id.0, u32::from(reply.ip), u32::from(tuner_count))
}
