//! Async facade over [`DeviceSession`].
//!
//! Each operation runs on tokio's blocking pool while holding the session's
//! mutex, so calls are serialized and resolve only after the device replied.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::{self, JoinError};

use crate::error::{HdhrError, Result};
use crate::session::{DeviceSession, LockState};
use crate::status::TunerStatus;
use crate::stream::StreamStats;

/// A [`DeviceSession`] usable from async code.
#[derive(Clone)]
pub struct AsyncDeviceSession {
    inner: Arc<Mutex<DeviceSession>>,
}

impl AsyncDeviceSession {
    /// Wrap a session.
    pub fn new(session: DeviceSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Run a blocking operation on the session.
    pub async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut DeviceSession) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = Arc::clone(&self.inner).lock_owned().await;
        task::spawn_blocking(move || op(&mut *guard))
            .await
            .map_err(join_error)?
    }

    /// Session name.
    pub async fn name(&self) -> String {
        self.inner.lock().await.name()
    }

    /// Last known lock state.
    pub async fn lock_state(&self) -> LockState {
        self.inner.lock().await.lock_state()
    }

    /// See [`DeviceSession::get_var`].
    pub async fn get_var(&self, name: impl Into<String>) -> Result<String> {
        let name = name.into();
        self.run(move |s| s.get_var(&name)).await
    }

    /// See [`DeviceSession::set_var`].
    pub async fn set_var(&self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let (name, value) = (name.into(), value.into());
        self.run(move |s| s.set_var(&name, &value)).await
    }

    /// See [`DeviceSession::tuner_status`].
    pub async fn tuner_status(&self) -> Result<TunerStatus> {
        self.run(DeviceSession::tuner_status).await
    }

    /// See [`DeviceSession::set_tuner_channel`].
    pub async fn set_tuner_channel(&self, channel: impl Into<String>) -> Result<()> {
        let channel = channel.into();
        self.run(move |s| s.set_tuner_channel(&channel)).await
    }

    /// See [`DeviceSession::wait_for_lock`].
    pub async fn wait_for_lock(&self) -> Result<TunerStatus> {
        self.run(DeviceSession::wait_for_lock).await
    }

    /// See [`DeviceSession::lock_request`].
    pub async fn lock_request(&self) -> Result<()> {
        self.run(DeviceSession::lock_request).await
    }

    /// See [`DeviceSession::lock_force`].
    pub async fn lock_force(&self) -> Result<()> {
        self.run(DeviceSession::lock_force).await
    }

    /// See [`DeviceSession::lock_release`].
    pub async fn lock_release(&self) -> Result<()> {
        self.run(DeviceSession::lock_release).await
    }

    /// See [`DeviceSession::stream_start`].
    pub async fn stream_start(&self) -> Result<()> {
        self.run(DeviceSession::stream_start).await
    }

    /// See [`DeviceSession::stream_recv`].
    pub async fn stream_recv(&self, max_size: usize) -> Option<Bytes> {
        self.inner.lock().await.stream_recv(max_size)
    }

    /// See [`DeviceSession::stream_stats`].
    pub async fn stream_stats(&self) -> StreamStats {
        self.inner.lock().await.stream_stats()
    }

    /// See [`DeviceSession::stream_stop`].
    pub async fn stream_stop(&self) -> Result<()> {
        self.run(|s| {
            s.stream_stop();
            Ok(())
        })
        .await
    }

    /// See [`DeviceSession::upgrade`].
    pub async fn upgrade(&self, path: impl Into<PathBuf>, wait: bool) -> Result<()> {
        let path = path.into();
        self.run(move |s| s.upgrade(&path, wait)).await
    }

    /// Drop the session on the blocking pool, releasing its lock.
    ///
    /// Other clones keep the session alive; only the last one tears it down.
    pub async fn close(self) -> Result<()> {
        if let Some(mutex) = Arc::into_inner(self.inner) {
            let session = mutex.into_inner();
            task::spawn_blocking(move || drop(session))
                .await
                .map_err(join_error)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for AsyncDeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncDeviceSession").finish_non_exhaustive()
    }
}

fn join_error(e: JoinError) -> HdhrError {
    HdhrError::communication(io::Error::other(e))
}
