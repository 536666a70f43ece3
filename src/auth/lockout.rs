//! Brute-Force Lockout Policy
//! Mission: Lock accounts after repeated failed logins

/// Consecutive failures before an account locks.
pub const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;

/// What the failure path decided for one more failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutDecision {
    /// Still below the threshold; counter advanced to this value.
    Counted(u32),
    /// Threshold reached; the account must be locked and the lock time stamped.
    Locked(u32),
}

impl LockoutDecision {
    pub fn attempts(&self) -> u32 {
        match self {
            LockoutDecision::Counted(n) | LockoutDecision::Locked(n) => *n,
        }
    }

    pub fn locks(&self) -> bool {
        matches!(self, LockoutDecision::Locked(_))
    }
}

/// Per-user lockout state machine, driven only by login failures.
/// Locking is terminal here; unlocking is an external administrative action.
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    threshold: u32,
}

impl LockoutPolicy {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Advance the counter for one failed attempt. The counter clamps at the
    /// threshold, so repeated failures against a locked account cannot grow it.
    pub fn after_failure(&self, failed_attempts: u32) -> LockoutDecision {
        let next = failed_attempts.saturating_add(1).min(self.threshold);
        if next >= self.threshold {
            LockoutDecision::Locked(next)
        } else {
            LockoutDecision::Counted(next)
        }
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_LOCKOUT_THRESHOLD)
    }
}
