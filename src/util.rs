//! Shared utility functions.

use std::time::Duration;

use crate::error::Result;

/// Default number of IP polls before giving up.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 180;

/// Default delay between IP polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bounded fixed-interval retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of probes, including the first one.
    pub max_attempts: u32,
    /// Sleep between two consecutive probes.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Create a new policy.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Policy that never sleeps. Used by tests with scripted probes.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL)
    }
}

/// Run `probe` until it yields a value, fails, or the attempt budget runs out.
///
/// `probe` receives the zero-based attempt index. `Ok(None)` means "not yet";
/// an `Err` stops polling immediately and is returned as is. Returns
/// `Ok(None)` once `max_attempts` probes have all come back empty.
pub fn poll_until<T, F>(policy: &RetryPolicy, mut probe: F) -> Result<Option<T>>
where
    F: FnMut(u32) -> Result<Option<T>>,
{
    for attempt in 0..policy.max_attempts {
        if let Some(value) = probe(attempt)? {
            return Ok(Some(value));
        }

        let last = attempt + 1 == policy.max_attempts;
        if !last && !policy.interval.is_zero() {
            std::thread::sleep(policy.interval);
        }
    }

    Ok(None)
}
