//! Streaming control.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};

use crate::error::{HdhrError, Result};
use crate::exchange::GetSetRequest;
use crate::session::DeviceSession;
use crate::stream::{StreamStats, StreamWorker};
use crate::transport::VideoBind;
use crate::types::TARGET_NONE;

/// Default rejection reason when the device will not stream.
pub const REJECTED_STREAM_START: &str = "the device refused to start streaming";

impl DeviceSession {
    /// Start receiving the tuner's output.
    ///
    /// In unicast mode the device's target is pointed at a fresh local
    /// socket. In multicast mode the group is joined and the device is not
    /// contacted. A running stream is stopped first.
    pub fn stream_start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            self.stream_stop();
        }

        let config = self.config().clone();
        let transport = Arc::clone(self.exchange.transport());

        if let Some((group, port)) = self.multicast {
            let socket = transport
                .open_video(VideoBind::Multicast { group, port }, &config)
                .map_err(HdhrError::communication)?;
            let worker = StreamWorker::spawn(socket, config.stream_buffer_size)
                .map_err(HdhrError::communication)?;
            debug!("{}: streaming from {group}:{port}", self.name());
            self.stream = Some(worker);
            return Ok(());
        }

        let device_ip = self.resolve_ip()?;
        let local_ip = self.exchange.local_ip(device_ip)?;
        let socket = transport
            .open_video(VideoBind::Unicast, &config)
            .map_err(HdhrError::communication)?;
        let port = socket.local_port().map_err(HdhrError::communication)?;
        let worker = StreamWorker::spawn(socket, config.stream_buffer_size)
            .map_err(HdhrError::communication)?;

        let target = format!("udp://{local_ip}:{port}");
        let request = GetSetRequest::set(self.tuner_var("target"), target.as_str())
            .lockkey(self.lock.lockkey());
        self.exchange
            .round_trip(device_ip, &request, REJECTED_STREAM_START)?;

        debug!("{}: streaming to {target}", self.name());
        self.stream = Some(worker);
        Ok(())
    }

    /// Take up to `max_size` buffered bytes.
    ///
    /// Never blocks. `None` means nothing is buffered or the stream is not
    /// running.
    pub fn stream_recv(&mut self, max_size: usize) -> Option<Bytes> {
        self.stream.as_ref()?.buffer().pull(max_size)
    }

    /// Discard buffered bytes. The device keeps streaming.
    pub fn stream_flush(&mut self) {
        if let Some(worker) = &self.stream {
            worker.buffer().flush();
        }
    }

    /// Stop streaming.
    ///
    /// Clearing the device's target is best-effort; failures are logged only.
    pub fn stream_stop(&mut self) {
        let Some(mut worker) = self.stream.take() else {
            return;
        };

        if self.multicast.is_none() {
            let name = self.tuner_var("target");
            if let Err(e) = self.set_var(&name, TARGET_NONE) {
                warn!("{}: failed to clear stream target: {e}", self.name());
            }
        }
        worker.stop();
        debug!("{}: stream stopped", self.name());
    }

    /// Check if a stream is running.
    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Counters for the running stream, zero when stopped.
    pub fn stream_stats(&self) -> StreamStats {
        self.stream
            .as_ref()
            .map(|worker| worker.buffer().stats())
            .unwrap_or_default()
    }
}
