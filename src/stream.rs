//! Video stream buffering.
//!
//! A producer thread drains the video socket into a bounded ring; the session
//! pulls from the ring without blocking. When the ring is full, incoming
//! datagrams are dropped whole and counted as overflow.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::transport::udp::is_timeout;
use crate::transport::VideoSocket;
use crate::types::{TS_PACKET_SIZE, VIDEO_DATA_PACKET_SIZE};

/// MPEG-TS sync byte.
const TS_SYNC_BYTE: u8 = 0x47;

/// Receive buffer size for one datagram.
const RECV_BUFFER_SIZE: usize = VIDEO_DATA_PACKET_SIZE * 2;

/// Pause after a hard socket error before reading again.
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Counters describing stream health since the last start or flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// TS packets accepted into the buffer.
    pub packet_count: u64,
    /// TS packets flagged with the transport error indicator.
    pub transport_error_count: u64,
    /// Socket errors and malformed datagrams.
    pub network_error_count: u64,
    /// Datagrams dropped because the buffer was full.
    pub overflow_error_count: u64,
}

struct Ring {
    data: Box<[u8]>,
    read_pos: usize,
    len: usize,
    stats: StreamStats,
}

impl Ring {
    fn write_pos(&self) -> usize {
        (self.read_pos + self.len) % self.data.len()
    }
}

/// Bounded byte ring shared by the producer thread and the session.
pub struct StreamBuffer {
    inner: Mutex<Ring>,
    capacity: usize,
}

impl StreamBuffer {
    /// Create a buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(TS_PACKET_SIZE);
        Self {
            inner: Mutex::new(Ring {
                data: vec![0u8; capacity].into_boxed_slice(),
                read_pos: 0,
                len: 0,
                stats: StreamStats::default(),
            }),
            capacity,
        }
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered.
    pub fn available(&self) -> usize {
        self.inner.lock().len
    }

    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Append one datagram.
    ///
    /// Returns false if the datagram was dropped for lack of space.
    pub fn push_datagram(&self, datagram: &[u8]) -> bool {
        let mut ring = self.inner.lock();

        if datagram.is_empty() || datagram.len() % TS_PACKET_SIZE != 0 {
            ring.stats.network_error_count += 1;
            return false;
        }
        if self.capacity - ring.len < datagram.len() {
            ring.stats.overflow_error_count += 1;
            return false;
        }

        for packet in datagram.chunks_exact(TS_PACKET_SIZE) {
            ring.stats.packet_count += 1;
            if packet[0] == TS_SYNC_BYTE && packet[1] & 0x80 != 0 {
                ring.stats.transport_error_count += 1;
            }
        }

        let write = ring.write_pos();
        let first = datagram.len().min(self.capacity - write);
        ring.data[write..write + first].copy_from_slice(&datagram[..first]);
        if first < datagram.len() {
            let rest = datagram.len() - first;
            ring.data[..rest].copy_from_slice(&datagram[first..]);
        }
        ring.len += datagram.len();
        true
    }

    /// Take up to `max_size` bytes, or `None` if nothing is buffered.
    pub fn pull(&self, max_size: usize) -> Option<Bytes> {
        let mut ring = self.inner.lock();
        let count = max_size.min(ring.len);
        if count == 0 {
            return None;
        }

        let read = ring.read_pos;
        let mut out = Vec::with_capacity(count);
        let first = count.min(self.capacity - read);
        out.extend_from_slice(&ring.data[read..read + first]);
        if first < count {
            out.extend_from_slice(&ring.data[..count - first]);
        }

        ring.read_pos = (read + count) % self.capacity;
        ring.len -= count;
        Some(Bytes::from(out))
    }

    /// Discard buffered bytes and reset counters.
    pub fn flush(&self) {
        let mut ring = self.inner.lock();
        ring.read_pos = 0;
        ring.len = 0;
        ring.stats = StreamStats::default();
    }

    /// Current counters.
    pub fn stats(&self) -> StreamStats {
        self.inner.lock().stats
    }

    fn record_network_error(&self) {
        self.inner.lock().stats.network_error_count += 1;
    }
}

impl std::fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// Producer thread feeding a [`StreamBuffer`] from a video socket.
///
/// The thread is stopped and joined on [`stop`](Self::stop) or drop.
#[derive(Debug)]
pub struct StreamWorker {
    buffer: Arc<StreamBuffer>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StreamWorker {
    /// Start draining `socket` into a new buffer of `capacity` bytes.
    pub fn spawn(mut socket: Box<dyn VideoSocket>, capacity: usize) -> io::Result<Self> {
        let buffer = Arc::new(StreamBuffer::new(capacity));
        let running = Arc::new(AtomicBool::new(true));

        let thread_buffer = Arc::clone(&buffer);
        let thread_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("hdhr-video".to_string())
            .spawn(move || receive_loop(socket.as_mut(), &thread_buffer, &thread_running))?;

        Ok(Self {
            buffer,
            running,
            handle: Some(handle),
        })
    }

    /// The buffer being filled.
    pub fn buffer(&self) -> &StreamBuffer {
        &self.buffer
    }

    /// Stop the producer and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("video receive thread panicked");
            }
        }
        self.buffer.flush();
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(socket: &mut dyn VideoSocket, buffer: &StreamBuffer, running: &AtomicBool) {
    let mut datagram = vec![0u8; RECV_BUFFER_SIZE];
    debug!("video receive thread started");

    while running.load(Ordering::Acquire) {
        match socket.recv(&mut datagram) {
            Ok(0) => {}
            Ok(len) => {
                if !buffer.push_datagram(&datagram[..len]) {
                    trace!("dropped {len} byte datagram");
                }
            }
            Err(e) if is_timeout(&e) || e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                debug!("video receive error: {e}");
                buffer.record_network_error();
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    debug!("video receive thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Instant;

    fn ts_packets(count: usize, fill: u8) -> Vec<u8> {
        let mut data = vec![fill; TS_PACKET_SIZE * count];
        for packet in data.chunks_exact_mut(TS_PACKET_SIZE) {
            packet[0] = TS_SYNC_BYTE;
            packet[1] = 0x00;
        }
        data
    }

    struct QueueSocket {
        queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    }

    impl VideoSocket for QueueSocket {
        fn local_port(&self) -> io::Result<u16> {
            Ok(5000)
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.queue.lock().pop_front() {
                Some(data) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                None => {
                    thread::sleep(Duration::from_millis(1));
                    Err(io::Error::new(io::ErrorKind::WouldBlock, "idle"))
                }
            }
        }
    }

    #[test]
    fn test_push_and_pull() {
        let buffer = StreamBuffer::new(TS_PACKET_SIZE * 10);
        assert!(buffer.pull(1000).is_none());

        assert!(buffer.push_datagram(&ts_packets(7, 0x11)));
        assert_eq!(buffer.available(), TS_PACKET_SIZE * 7);

        let first = buffer.pull(TS_PACKET_SIZE * 2).unwrap();
        assert_eq!(first.len(), TS_PACKET_SIZE * 2);
        assert_eq!(first[0], TS_SYNC_BYTE);

        let rest = buffer.pull(usize::MAX).unwrap();
        assert_eq!(rest.len(), TS_PACKET_SIZE * 5);
        assert!(buffer.pull(1).is_none());
        assert_eq!(buffer.stats().packet_count, 7);
    }

    #[test]
    fn test_wrap_around_preserves_order() {
        let buffer = StreamBuffer::new(TS_PACKET_SIZE * 10);
        buffer.push_datagram(&ts_packets(7, 0x01));
        buffer.pull(TS_PACKET_SIZE * 6).unwrap();

        let second = ts_packets(7, 0x02);
        assert!(buffer.push_datagram(&second));

        let out = buffer.pull(usize::MAX).unwrap();
        assert_eq!(out.len(), TS_PACKET_SIZE * 8);
        assert_eq!(out[2], 0x01);
        assert_eq!(&out[TS_PACKET_SIZE..], &second[..]);
    }

    #[test]
    fn test_overflow_drops_whole_datagram() {
        let buffer = StreamBuffer::new(TS_PACKET_SIZE * 10);
        assert!(buffer.push_datagram(&ts_packets(7, 0)));
        assert!(!buffer.push_datagram(&ts_packets(7, 0)));

        let stats = buffer.stats();
        assert_eq!(stats.overflow_error_count, 1);
        assert_eq!(stats.packet_count, 7);
        assert_eq!(buffer.available(), TS_PACKET_SIZE * 7);
    }

    #[test]
    fn test_transport_error_and_malformed_counted() {
        let buffer = StreamBuffer::new(TS_PACKET_SIZE * 10);
        let mut data = ts_packets(2, 0);
        data[TS_PACKET_SIZE + 1] = 0x80;
        buffer.push_datagram(&data);
        buffer.push_datagram(&[0x47; 100]);

        let stats = buffer.stats();
        assert_eq!(stats.transport_error_count, 1);
        assert_eq!(stats.network_error_count, 1);
    }

    #[test]
    fn test_flush_clears() {
        let buffer = StreamBuffer::new(TS_PACKET_SIZE * 10);
        buffer.push_datagram(&ts_packets(3, 0));
        buffer.flush();
        assert!(buffer.is_empty());
        assert_eq!(buffer.stats(), StreamStats::default());
    }

    #[test]
    fn test_worker_drains_socket() {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        queue.lock().push_back(ts_packets(7, 0xAA));
        queue.lock().push_back(ts_packets(7, 0xBB));

        let socket = QueueSocket {
            queue: Arc::clone(&queue),
        };
        let mut worker = StreamWorker::spawn(Box::new(socket), TS_PACKET_SIZE * 100).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.buffer().available() < TS_PACKET_SIZE * 14 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let data = worker.buffer().pull(usize::MAX).unwrap();
        assert_eq!(data.len(), TS_PACKET_SIZE * 14);
        assert_eq!(data[2], 0xAA);
        assert_eq!(data[TS_PACKET_SIZE * 7 + 2], 0xBB);

        worker.stop();
        assert!(worker.buffer().pull(usize::MAX).is_none());
    }
}
