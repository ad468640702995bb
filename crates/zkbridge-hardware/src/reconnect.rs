//! Reconnect budgeting.

/// Consecutive connect failures against a fixed ceiling.
///
/// Once `attempts` reaches `ceiling`, [`should_attempt`](Self::should_attempt)
/// stays `false` until a successful connection calls
/// [`reset`](Self::reset).
///
/// # Examples
///
/// ```
/// use zkbridge_hardware::reconnect::ReconnectPolicy;
///
/// let mut policy = ReconnectPolicy::new(2);
/// policy.record_failure();
/// assert!(policy.should_attempt());
/// policy.record_failure();
/// assert!(!policy.should_attempt());
///
/// policy.reset();
/// assert_eq!(policy.attempts(), 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    attempts: u32,
    ceiling: u32,
}

impl ReconnectPolicy {
    #[must_use]
    pub const fn new(ceiling: u32) -> Self {
        Self { attempts: 0, ceiling }
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub const fn ceiling(&self) -> u32 {
        self.ceiling
    }

    #[must_use]
    pub const fn should_attempt(&self) -> bool {
        self.attempts < self.ceiling
    }

    /// Count one failed connect. Saturates at the ceiling.
    pub fn record_failure(&mut self) {
        self.attempts = (self.attempts + 1).min(self.ceiling);
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
