//! Session lock state.

/// Last known ownership of the selected tuner.
///
/// This is the session's own record. The device is the authority on who
/// actually holds the tuner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockState {
    /// No lock held by this session.
    #[default]
    Unlocked,
    /// This session acquired the tuner with `lockkey`.
    Locked {
        /// Key sent with every set while locked.
        lockkey: u32,
    },
}

impl LockState {
    /// Check if a lock is held.
    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Locked { .. })
    }

    /// The held key, or 0 when unlocked.
    pub fn lockkey(&self) -> u32 {
        match self {
            LockState::Locked { lockkey } => *lockkey,
            LockState::Unlocked => 0,
        }
    }
}
