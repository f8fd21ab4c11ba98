//! Named-variable get/set round trips.
//!
//! Every control operation on a device is a single synchronous exchange:
//! one request, one reply, no batching and no pipelining. Outcomes are mapped
//! onto [`HdhrError`] here and nowhere else.

use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;

use log::{debug, trace};

use crate::config::SessionConfig;
use crate::error::{HdhrError, Result};
use crate::transport::{ControlChannel, Transport};

/// Default rejection reason for a get.
pub const REJECTED_GET: &str = "the get operation was rejected by the device";

/// Default rejection reason for a set.
pub const REJECTED_SET: &str = "the set operation was rejected by the device";

/// Device reply to a control request, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    /// The device performed the operation.
    Accepted(T),
    /// The device declined, optionally explaining why.
    Rejected(Option<String>),
    /// The reply carried neither a result nor an error.
    Unrecognized,
}

impl<T> Reply<T> {
    /// Map the accepted value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        match self {
            Reply::Accepted(v) => Reply::Accepted(f(v)),
            Reply::Rejected(reason) => Reply::Rejected(reason),
            Reply::Unrecognized => Reply::Unrecognized,
        }
    }

    /// Classify into the error taxonomy.
    pub fn into_result(self, default_reason: &str) -> Result<T> {
        match self {
            Reply::Accepted(v) => Ok(v),
            Reply::Rejected(reason) => Err(HdhrError::rejected(reason, default_reason)),
            Reply::Unrecognized => Err(HdhrError::Undocumented),
        }
    }
}

/// A get (no value) or set (with value) request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetSetRequest {
    /// Variable name, e.g. `/tuner0/channel`.
    pub name: String,
    /// New value for a set.
    pub value: Option<String>,
    /// Lock key proving ownership of the tuner.
    pub lockkey: Option<u32>,
}

impl GetSetRequest {
    /// Create a get request.
    pub fn get(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            lockkey: None,
        }
    }

    /// Create a set request.
    pub fn set(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            lockkey: None,
        }
    }

    /// Attach a lock key. Zero means no key.
    pub fn lockkey(mut self, lockkey: u32) -> Self {
        self.lockkey = (lockkey != 0).then_some(lockkey);
        self
    }
}

/// Owns the single control connection of a session.
///
/// The connection is opened lazily and dropped after any communication
/// failure, so the next call reconnects. Nothing is retried automatically.
pub struct VariableExchange {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    channel: Option<(Ipv4Addr, Box<dyn ControlChannel>)>,
}

impl VariableExchange {
    /// Create an exchange that connects through `transport`.
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            channel: None,
        }
    }

    /// The transport used for connections.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Close the control connection, if any.
    pub fn disconnect(&mut self) {
        if let Some((ip, _)) = self.channel.take() {
            debug!("closing control connection to {ip}");
        }
    }

    /// Check if a control connection is open.
    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Read a named variable.
    pub fn get(&mut self, device_ip: Ipv4Addr, name: &str) -> Result<String> {
        self.round_trip(device_ip, &GetSetRequest::get(name), REJECTED_GET)
    }

    /// Write a named variable.
    pub fn set(&mut self, device_ip: Ipv4Addr, name: &str, value: &str, lockkey: u32) -> Result<()> {
        let request = GetSetRequest::set(name, value).lockkey(lockkey);
        self.round_trip(device_ip, &request, REJECTED_SET).map(|_| ())
    }

    /// Perform one request with a call-site specific default rejection reason.
    pub fn round_trip(
        &mut self,
        device_ip: Ipv4Addr,
        request: &GetSetRequest,
        default_reason: &str,
    ) -> Result<String> {
        trace!("{device_ip}: {} {:?}", request.name, request.value);
        let reply = self.with_channel(device_ip, |channel| channel.get_set(request))?;
        if let Reply::Rejected(reason) = &reply {
            debug!("{device_ip}: {} rejected: {reason:?}", request.name);
        }
        reply.into_result(default_reason)
    }

    /// Upload a firmware image.
    pub fn upgrade(&mut self, device_ip: Ipv4Addr, image: &[u8], default_reason: &str) -> Result<()> {
        debug!("{device_ip}: uploading {} byte firmware image", image.len());
        let reply = self.with_channel(device_ip, |channel| channel.upgrade(image))?;
        reply.into_result(default_reason)
    }

    /// Local address of the control connection, used as the stream target.
    pub fn local_ip(&mut self, device_ip: Ipv4Addr) -> Result<Ipv4Addr> {
        self.with_channel(device_ip, |channel| channel.local_ip())
    }

    fn with_channel<T>(
        &mut self,
        device_ip: Ipv4Addr,
        op: impl FnOnce(&mut dyn ControlChannel) -> io::Result<T>,
    ) -> Result<T> {
        if matches!(&self.channel, Some((ip, _)) if *ip != device_ip) {
            self.disconnect();
        }

        if self.channel.is_none() {
            debug!("connecting to {device_ip}");
            let channel = self
                .transport
                .connect(device_ip, &self.config)
                .map_err(HdhrError::communication)?;
            self.channel = Some((device_ip, channel));
        }

        let Some((_, channel)) = self.channel.as_mut() else {
            return Err(HdhrError::communication(io::Error::new(
                io::ErrorKind::NotConnected,
                "control connection unavailable",
            )));
        };

        match op(channel.as_mut()) {
            Ok(v) => Ok(v),
            Err(e) => {
                debug!("{device_ip}: communication failure: {e}");
                self.channel = None;
                Err(HdhrError::communication(e))
            }
        }
    }
}

impl std::fmt::Debug for VariableExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableExchange")
            .field("connected_to", &self.channel.as_ref().map(|(ip, _)| *ip))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::FakeTransport;

    const IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 100);

    fn exchange(fake: &FakeTransport) -> VariableExchange {
        VariableExchange::new(Arc::new(fake.clone()), SessionConfig::default())
    }

    #[test]
    fn test_reply_into_result() {
        assert_eq!(Reply::Accepted(5).into_result("x").unwrap(), 5);

        let err = Reply::<()>::Rejected(None).into_result(REJECTED_SET).unwrap_err();
        assert_eq!(err.reason(), Some(REJECTED_SET));

        let err = Reply::<()>::Rejected(Some("ERROR: invalid value".into()))
            .into_result(REJECTED_SET)
            .unwrap_err();
        assert_eq!(err.reason(), Some("ERROR: invalid value"));

        let err = Reply::<()>::Unrecognized.into_result(REJECTED_GET).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Undocumented);
    }

    #[test]
    fn test_lockkey_zero_is_omitted() {
        assert_eq!(GetSetRequest::set("/tuner0/channel", "auto:5").lockkey(0).lockkey, None);
        assert_eq!(GetSetRequest::set("/tuner0/channel", "auto:5").lockkey(7).lockkey, Some(7));
    }

    #[test]
    fn test_get_and_set() {
        let fake = FakeTransport::new();
        fake.set_var("/sys/model", "hdhomerun4_atsc");
        let mut ex = exchange(&fake);

        assert_eq!(ex.get(IP, "/sys/model").unwrap(), "hdhomerun4_atsc");
        ex.set(IP, "/tuner0/channel", "auto:503000000", 0).unwrap();
        assert_eq!(fake.var("/tuner0/channel").as_deref(), Some("auto:503000000"));
        assert_eq!(fake.connect_count(), 1);
    }

    #[test]
    fn test_get_unknown_variable_rejected() {
        let fake = FakeTransport::new();
        let mut ex = exchange(&fake);

        let err = ex.get(IP, "/sys/bogus").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert_eq!(err.reason(), Some("ERROR: unknown getset variable"));
    }

    #[test]
    fn test_communication_failure_drops_connection() {
        let fake = FakeTransport::new();
        fake.set_var("/sys/model", "hdhomerun4_atsc");
        let mut ex = exchange(&fake);
        ex.get(IP, "/sys/model").unwrap();
        assert!(ex.is_connected());

        fake.set_offline(true);
        let err = ex.get(IP, "/sys/model").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Communication);
        assert!(!ex.is_connected());

        fake.set_offline(false);
        ex.get(IP, "/sys/model").unwrap();
        assert_eq!(fake.connect_count(), 2);
    }

    #[test]
    fn test_unrecognized_reply_is_undocumented() {
        let fake = FakeTransport::new();
        fake.set_unrecognized("/sys/odd");
        let mut ex = exchange(&fake);
        let err = ex.get(IP, "/sys/odd").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Undocumented);
    }
}
