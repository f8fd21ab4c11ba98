//! Tuner lock keys and lock-status waits.

use log::{debug, warn};
use rand::Rng;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::exchange::GetSetRequest;
use crate::session::{DeviceSession, LockState};
use crate::status::TunerStatus;
use crate::types::{LOCKKEY_FORCE, LOCKKEY_NONE};

/// Default rejection reason for a lock request.
pub const REJECTED_LOCK: &str = "the device rejected the lock request";

/// Default rejection reason for a forced lock.
pub const REJECTED_FORCE: &str = "the device rejected the forced lock request";

/// Default rejection reason for a lock release.
pub const REJECTED_UNLOCK: &str = "the device rejected the unlock request";

/// Default rejection reason for a status read while waiting for lock.
pub const REJECTED_WAIT_FOR_LOCK: &str = "the device did not report lock status";

fn new_lockkey() -> u32 {
    rand::thread_rng().gen_range(1..=u32::MAX)
}

impl DeviceSession {
    /// Acquire the selected tuner.
    ///
    /// On success the session is [`LockState::Locked`]; on any failure the
    /// state is unchanged.
    pub fn lock_request(&mut self) -> Result<()> {
        self.acquire(REJECTED_LOCK)
    }

    /// Clear any existing lock on the tuner, then acquire it.
    ///
    /// Used to recover a tuner left locked by a client that went away.
    pub fn lock_force(&mut self) -> Result<()> {
        let name = self.tuner_var("lockkey");
        let ip = self.resolve_ip()?;
        let request = GetSetRequest::set(name, LOCKKEY_FORCE);
        self.exchange.round_trip(ip, &request, REJECTED_FORCE)?;
        self.lock = LockState::Unlocked;
        debug!("{}: cleared tuner lock", self.name());

        self.acquire(REJECTED_FORCE)
    }

    /// Release the tuner.
    ///
    /// Releasing an unlocked session succeeds without contacting the device.
    /// On failure the session stays locked.
    pub fn lock_release(&mut self) -> Result<()> {
        let LockState::Locked { lockkey } = self.lock else {
            return Ok(());
        };

        let name = self.tuner_var("lockkey");
        let ip = self.resolve_ip()?;
        let request = GetSetRequest::set(name, LOCKKEY_NONE).lockkey(lockkey);
        self.exchange.round_trip(ip, &request, REJECTED_UNLOCK)?;

        self.lock = LockState::Unlocked;
        debug!("{}: released tuner lock", self.name());
        Ok(())
    }

    /// Wait for the tuner to report a definitive lock after a channel change.
    pub fn wait_for_lock(&mut self) -> Result<TunerStatus> {
        self.wait_for_lock_with(&SystemClock)
    }

    /// [`wait_for_lock`](Self::wait_for_lock) with an explicit time source.
    ///
    /// Returns as soon as there is no signal, the lock is definitive, or the
    /// timeout passes, with the last status read.
    pub fn wait_for_lock_with(&mut self, clock: &dyn Clock) -> Result<TunerStatus> {
        let timing = self.config().wait_for_lock.clone();
        let name = self.tuner_var("status");

        clock.sleep(timing.settle_delay);
        let deadline = clock.now() + timing.timeout;

        loop {
            let ip = self.resolve_ip()?;
            let raw = self
                .exchange
                .round_trip(ip, &GetSetRequest::get(name.as_str()), REJECTED_WAIT_FOR_LOCK)?;
            let status = TunerStatus::parse(&raw);

            if !status.signal_present || status.lock_is_definitive() || clock.now() >= deadline {
                return Ok(status);
            }
            clock.sleep(timing.poll_interval);
        }
    }

    fn acquire(&mut self, default_reason: &str) -> Result<()> {
        let name = self.tuner_var("lockkey");
        let ip = self.resolve_ip()?;
        let lockkey = new_lockkey();
        let request = GetSetRequest::set(name, lockkey.to_string()).lockkey(self.lock.lockkey());
        self.exchange.round_trip(ip, &request, default_reason)?;

        self.lock = LockState::Locked { lockkey };
        debug!("{}: acquired tuner lock", self.name());
        Ok(())
    }

    /// Release without surfacing failures; the session ends up unlocked.
    pub(super) fn release_best_effort(&mut self) {
        if !self.lock.is_locked() {
            return;
        }
        if let Err(e) = self.lock_release() {
            warn!("{}: failed to release tuner lock: {e}", self.name());
        }
        self.lock = LockState::Unlocked;
    }
}
